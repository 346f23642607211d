//! What a remote job runs: fetch the trial, evaluate it, store the outcome.

use ob_batch::{ENV_BLOB_NAME, ENV_BUCKET_NAME, ENV_RESULT_BLOB_NAME};
use ob_store::codec::{self, TrialRecord};
use ob_store::ObjectStore;
use ob_types::{ConfigError, ObResult, ObjectiveValue, Outcome};
use tracing::{info, warn};

/// Locations handed to the job through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub bucket: String,
    pub blob: String,
    pub result_blob: String,
}

impl WorkerEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::Missing {
                    message: format!("environment variable {name} is not set"),
                })
        };
        Ok(Self {
            bucket: var(ENV_BUCKET_NAME)?,
            blob: var(ENV_BLOB_NAME)?,
            result_blob: var(ENV_RESULT_BLOB_NAME)?,
        })
    }
}

/// Evaluate the trial stored at `env.blob` and write its outcome to
/// `env.result_blob`.
///
/// An objective that errors or returns a non-finite value produces an
/// explicit failed outcome rather than no outcome at all. Only store and
/// decoding problems are returned as errors.
pub async fn run_worker<S, F>(store: &S, env: &WorkerEnv, objective: F) -> ObResult<Outcome>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(&TrialRecord) -> anyhow::Result<ObjectiveValue>,
{
    let bytes = store.get(&env.blob).await?;
    let trial = codec::decode_trial(&bytes)?;
    info!(trial = %trial.trial_ref(), blob = %env.blob, "trial loaded");

    let outcome = match objective(&trial) {
        Ok(values) if values.is_finite() => Outcome::complete(trial.trial_ref(), values),
        Ok(values) => {
            warn!(trial = %trial.trial_ref(), %values, "objective is not finite");
            Outcome::failed(trial.trial_ref(), format!("objective returned {values}"))
        }
        Err(e) => {
            warn!(trial = %trial.trial_ref(), error = %e, "objective failed");
            Outcome::failed(trial.trial_ref(), format!("{e:#}"))
        }
    };

    store
        .put(&env.result_blob, codec::encode_outcome(&outcome)?)
        .await?;
    info!(
        trial = %trial.trial_ref(),
        result_blob = %env.result_blob,
        success = outcome.is_success(),
        "outcome written"
    );
    Ok(outcome)
}
