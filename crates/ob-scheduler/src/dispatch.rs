//! One dispatched trial: upload, submit, poll, fetch the outcome, report.

use ob_batch::{wait_for_job, JobClient, JobHandle, JobTemplate, PollPolicy};
use ob_store::{codec, ObjectStore, StoreKeys};
use ob_types::{
    CodecError, ObjectiveValue, OutcomeRetrievalError, StoreError, SubmissionError, Trial,
    TrialNumber, TrialRef, TrialResult,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a dispatched trial produced no value.
#[derive(Debug, thiserror::Error)]
pub enum TrialFailure {
    #[error("could not encode trial: {0}")]
    Encode(#[from] CodecError),
    #[error("could not upload trial: {0}")]
    Upload(#[from] StoreError),
    #[error("submission rejected: {0}")]
    Submission(#[from] SubmissionError),
    #[error("{0}")]
    Job(String),
    #[error("outcome unusable: {0}")]
    Outcome(#[from] OutcomeRetrievalError),
    #[error("worker reported failure: {0}")]
    Reported(String),
    #[error("dispatch task ended without reporting")]
    Lost,
}

/// Terminal event of one dispatched trial, delivered to the scheduling loop.
#[derive(Debug)]
pub struct Completion {
    pub number: TrialNumber,
    pub job: Option<JobHandle>,
    pub result: Result<ObjectiveValue, TrialFailure>,
}

/// Everything a dispatch task needs, shared by all of them.
pub(crate) struct DispatchContext<C: ?Sized, S: ?Sized> {
    pub client: Arc<C>,
    pub store: Arc<S>,
    pub template: JobTemplate,
    pub keys: StoreKeys,
    pub bucket: String,
    pub poll: PollPolicy,
}

/// Sends exactly one [`Completion`] when dropped, a [`TrialFailure::Lost`]
/// one if the task never got to report (e.g. it panicked).
///
/// The channel holds `n_jobs` slots and at most `n_jobs` trials are in
/// flight, so `try_send` never finds it full.
struct CompletionGuard {
    tx: mpsc::Sender<Completion>,
    number: TrialNumber,
    job: Option<JobHandle>,
    result: Option<Result<ObjectiveValue, TrialFailure>>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let completion = Completion {
            number: self.number,
            job: self.job.take(),
            result: self.result.take().unwrap_or(Err(TrialFailure::Lost)),
        };
        if let Err(e) = self.tx.try_send(completion) {
            warn!(trial = self.number, error = %e, "completion dropped, scheduler has stopped");
        }
    }
}

pub(crate) fn spawn_trial<C, S>(
    ctx: Arc<DispatchContext<C, S>>,
    trial: Trial,
    tx: mpsc::Sender<Completion>,
) where
    C: JobClient + ?Sized + 'static,
    S: ObjectStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut guard = CompletionGuard {
            tx,
            number: trial.number,
            job: None,
            result: None,
        };
        let result = run_trial(&*ctx, trial, &mut guard.job).await;
        guard.result = Some(result);
    });
}

async fn run_trial<C, S>(
    ctx: &DispatchContext<C, S>,
    mut trial: Trial,
    job: &mut Option<JobHandle>,
) -> Result<ObjectiveValue, TrialFailure>
where
    C: JobClient + ?Sized,
    S: ObjectStore + ?Sized,
{
    let blob = ctx.keys.trial(trial.number);
    let result_blob = ctx.keys.outcome(trial.number);

    let bytes = codec::encode_trial(&trial)?;
    ctx.store.put(&blob, bytes).await?;

    let spec = ctx
        .template
        .build(trial.trial_ref(), &ctx.bucket, &blob, &result_blob);
    let handle = ctx.client.submit(&spec).await.map_err(|e| {
        warn!(trial = trial.number, error = %e, "job submission failed");
        e
    })?;
    trial.mark_dispatched();
    info!(trial = trial.number, job = %handle, "trial dispatched");
    *job = Some(handle.clone());

    let termination = wait_for_job(ctx.client.as_ref(), &handle, &ctx.poll).await;
    if let Some(reason) = termination.failure_reason() {
        return Err(TrialFailure::Job(reason));
    }

    match fetch_outcome(ctx.store.as_ref(), &result_blob, &trial.trial_ref()).await? {
        TrialResult::Complete { values } => {
            debug!(trial = trial.number, %values, "outcome retrieved");
            Ok(values)
        }
        TrialResult::Failed { reason } => Err(TrialFailure::Reported(reason)),
    }
}

async fn fetch_outcome<S: ObjectStore + ?Sized>(
    store: &S,
    key: &str,
    expected: &TrialRef,
) -> Result<TrialResult, OutcomeRetrievalError> {
    let bytes = store.get(key).await.map_err(|source| match source {
        StoreError::NotFound { .. } => OutcomeRetrievalError::Missing {
            key: key.to_string(),
        },
        source => OutcomeRetrievalError::Store {
            key: key.to_string(),
            source,
        },
    })?;

    let outcome = codec::decode_outcome(&bytes).map_err(|source| OutcomeRetrievalError::Decode {
        key: key.to_string(),
        source,
    })?;

    if &outcome.trial != expected {
        return Err(OutcomeRetrievalError::Mismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            found: outcome.trial.to_string(),
        });
    }
    Ok(outcome.result)
}
