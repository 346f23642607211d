//! Wires a [`SchedulerConfig`] into a running [`Scheduler`].

use ob_batch::JobClient;
use ob_optimizer::Study;
use ob_store::{Checkpointer, LoadError, ObjectStore, StoreKeys};
use ob_types::{ObError, ObResult, TrialState};
use std::sync::Arc;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::scheduler::{RunSummary, Scheduler, SchedulerSettings};

/// Run the configured study against `client` and `store`.
///
/// With `resume`, the study is rebuilt from its checkpoint when one exists:
/// trial numbering continues after the restored history, trials that were
/// still in flight are recorded as failed, and restored successes count
/// toward `n_trials`, so the run only tops the study up.
pub async fn run_study<C, S>(
    config: &SchedulerConfig,
    client: Arc<C>,
    store: Arc<S>,
    resume: bool,
) -> ObResult<RunSummary>
where
    C: JobClient + ?Sized + 'static,
    S: ObjectStore + ?Sized + 'static,
{
    let study_config = &config.study;
    let strategy = study_config.strategy.build(
        study_config.search_space.clone(),
        study_config.seed,
        study_config.exploration_weight,
        study_config.grid_steps,
    )?;
    let keys = StoreKeys::new(&study_config.name);

    let snapshot = if resume {
        Checkpointer::load(store.as_ref(), &keys)
            .await
            .map_err(|e| match e {
                LoadError::Store(e) => ObError::Store(e),
                LoadError::Codec(e) => ObError::Codec(e),
            })?
    } else {
        None
    };

    let mut already_succeeded = 0;
    let study = match snapshot {
        Some(snapshot) => {
            already_succeeded = snapshot.count(TrialState::Succeeded);
            info!(
                study = %snapshot.study_name,
                trials = snapshot.trials.len(),
                succeeded = already_succeeded,
                saved_at = %snapshot.saved_at,
                "resuming from checkpoint"
            );
            Study::restore(snapshot, strategy)?
        }
        None => {
            if resume {
                info!(study = %study_config.name, "no checkpoint found, starting fresh");
            }
            Study::new(&study_config.name, study_config.directions.clone(), strategy)?
        }
    };

    let settings = SchedulerSettings {
        n_trials: config.n_trials.saturating_sub(already_succeeded),
        n_jobs: config.n_jobs,
        bucket: config.worker_bucket(),
        poll: config.poll_policy(),
        backup_every: config.backup_every,
    };
    let mut scheduler = Scheduler::new(
        study,
        client,
        store,
        config.job_template(),
        keys,
        settings,
    );
    scheduler.run().await
}
