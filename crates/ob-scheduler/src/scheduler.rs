//! The scheduling loop.
//!
//! One logical control loop owns the optimizer. Dispatch tasks run
//! concurrently and report back over a bounded channel; the loop takes their
//! completions one at a time in arrival order, tells the optimizer, and
//! immediately backfills the freed slot until enough trials have succeeded.
//! Then it stops dispatching, drains what is still running and writes a
//! final checkpoint.

use ob_batch::{JobClient, JobTemplate, PollPolicy};
use ob_optimizer::{Optimizer, TellOutcome};
use ob_store::{Checkpointer, ObjectStore, StoreKeys};
use ob_types::{internal_error, ObResult, Trial, TrialNumber, TrialState};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::dispatch::{spawn_trial, Completion, DispatchContext};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Successful trials to collect before draining. Zero runs nothing and
    /// only writes the final checkpoint.
    pub n_trials: usize,
    /// Maximum concurrently dispatched trials.
    pub n_jobs: usize,
    /// Bucket (or directory) value handed to workers.
    pub bucket: String,
    pub poll: PollPolicy,
    /// Checkpoint every this many told trials; 0 disables periodic backups.
    pub backup_every: usize,
}

/// Trials currently dispatched and not yet told.
#[derive(Debug, Clone)]
pub struct InFlight {
    capacity: usize,
    numbers: BTreeSet<TrialNumber>,
    peak: usize,
}

impl InFlight {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            numbers: BTreeSet::new(),
            peak: 0,
        }
    }

    /// Take a slot for `number`. Fails if the window is full or the trial
    /// is already in it.
    pub fn admit(&mut self, number: TrialNumber) -> ObResult<()> {
        if self.is_full() {
            return Err(internal_error!(
                "in-flight window full ({} trials), cannot admit trial {number}",
                self.capacity
            ));
        }
        if !self.numbers.insert(number) {
            return Err(internal_error!("trial {number} is already in flight"));
        }
        self.peak = self.peak.max(self.numbers.len());
        Ok(())
    }

    /// Free the slot held by `number`; `false` if it held none.
    pub fn retire(&mut self, number: TrialNumber) -> bool {
        self.numbers.remove(&number)
    }

    pub fn contains(&self, number: TrialNumber) -> bool {
        self.numbers.contains(&number)
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.numbers.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of trials ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub asked: usize,
    /// Successes counted toward the target (drained ones excluded).
    pub successes: usize,
    /// Failures told before the target was met.
    pub failed: usize,
    /// Completions told after the target was met.
    pub drained: usize,
    pub told: usize,
    pub peak_in_flight: usize,
    pub checkpoints: usize,
    pub best: Option<Trial>,
}

pub struct Scheduler<O, C: ?Sized, S: ?Sized> {
    optimizer: O,
    ctx: Arc<DispatchContext<C, S>>,
    n_trials: usize,
    n_jobs: usize,
    checkpointer: Checkpointer,
}

impl<O, C, S> Scheduler<O, C, S>
where
    O: Optimizer,
    C: JobClient + ?Sized + 'static,
    S: ObjectStore + ?Sized + 'static,
{
    pub fn new(
        optimizer: O,
        client: Arc<C>,
        store: Arc<S>,
        template: JobTemplate,
        keys: StoreKeys,
        settings: SchedulerSettings,
    ) -> Self {
        let checkpointer = Checkpointer::new(&keys, settings.backup_every);
        Self {
            optimizer,
            ctx: Arc::new(DispatchContext {
                client,
                store,
                template,
                keys,
                bucket: settings.bucket,
                poll: settings.poll,
            }),
            n_trials: settings.n_trials,
            n_jobs: settings.n_jobs.max(1),
            checkpointer,
        }
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn into_optimizer(self) -> O {
        self.optimizer
    }

    /// Run the study to completion.
    ///
    /// Returns once `n_trials` successes have been told and every remaining
    /// in-flight trial has been drained. An optimizer error ends the run
    /// early; the final checkpoint is still attempted.
    pub async fn run(&mut self) -> ObResult<RunSummary> {
        let mut summary = RunSummary::default();
        let mut window = InFlight::new(self.n_jobs);

        info!(
            study = %self.optimizer.study_name(),
            n_trials = self.n_trials,
            n_jobs = self.n_jobs,
            "study started"
        );

        let result = self.drive(&mut window, &mut summary).await;
        if let Err(e) = &result {
            error!(
                study = %self.optimizer.study_name(),
                in_flight = window.len(),
                error = %e,
                "scheduling loop aborted"
            );
        }

        let snapshot = self.optimizer.snapshot();
        self.checkpointer
            .save(self.ctx.store.as_ref(), &snapshot)
            .await;

        summary.peak_in_flight = window.peak();
        summary.checkpoints = self.checkpointer.saves();
        summary.best = self.optimizer.best().cloned();
        result?;

        info!(
            study = %self.optimizer.study_name(),
            asked = summary.asked,
            successes = summary.successes,
            failed = summary.failed,
            drained = summary.drained,
            best_trial = ?summary.best.as_ref().map(|t| t.number),
            best_value = ?summary.best.as_ref().and_then(Trial::primary_value),
            "study finished"
        );
        Ok(summary)
    }

    async fn drive(&mut self, window: &mut InFlight, summary: &mut RunSummary) -> ObResult<()> {
        if self.n_trials == 0 {
            info!("success target already met, nothing to dispatch");
            return Ok(());
        }
        let (tx, mut rx) = mpsc::channel(self.n_jobs);

        for _ in 0..self.n_jobs {
            self.dispatch_next(window, &tx, summary)?;
        }

        while summary.successes < self.n_trials {
            let completion = rx
                .recv()
                .await
                .ok_or_else(|| internal_error!("completion channel closed"))?;
            let state = self.record(window, completion, summary).await?;
            if state == TrialState::Succeeded {
                summary.successes += 1;
            } else {
                summary.failed += 1;
            }
            self.dispatch_next(window, &tx, summary)?;
        }

        if !window.is_empty() {
            info!(in_flight = window.len(), "target reached, draining in-flight trials");
        }
        while !window.is_empty() {
            let completion = rx
                .recv()
                .await
                .ok_or_else(|| internal_error!("completion channel closed"))?;
            self.record(window, completion, summary).await?;
            summary.drained += 1;
        }
        Ok(())
    }

    fn dispatch_next(
        &mut self,
        window: &mut InFlight,
        tx: &mpsc::Sender<Completion>,
        summary: &mut RunSummary,
    ) -> ObResult<()> {
        let trial = self.optimizer.ask()?;
        window.admit(trial.number)?;
        summary.asked += 1;
        spawn_trial(Arc::clone(&self.ctx), trial, tx.clone());
        Ok(())
    }

    /// Tell one completion, report it, and take a periodic checkpoint if due.
    async fn record(
        &mut self,
        window: &mut InFlight,
        completion: Completion,
        summary: &mut RunSummary,
    ) -> ObResult<TrialState> {
        let Completion { number, job, result } = completion;
        if !window.retire(number) {
            return Err(internal_error!("completion for trial {number}, which is not in flight"));
        }

        let outcome = match result {
            Ok(values) => TellOutcome::Success(values),
            Err(failure) => {
                warn!(
                    trial = number,
                    job = ?job.as_ref().map(|j| j.id.as_str()),
                    error = %failure,
                    "trial failed"
                );
                TellOutcome::failure(failure.to_string())
            }
        };

        let told = self.optimizer.tell(number, outcome)?;
        let state = told.state;
        let value = told.values.clone();
        summary.told += 1;

        let best = self.optimizer.best();
        info!(
            trial = number,
            value = %value.map(|v| v.to_string()).unwrap_or_else(|| "failed".to_string()),
            best_value = ?best.and_then(Trial::primary_value),
            best_trial = ?best.map(|t| t.number),
            best_params = %best.map(Trial::params_json).unwrap_or_default(),
            "trial told"
        );

        if self.checkpointer.record() {
            let snapshot = self.optimizer.snapshot();
            self.checkpointer
                .save(self.ctx.store.as_ref(), &snapshot)
                .await;
        }
        Ok(state)
    }
}
