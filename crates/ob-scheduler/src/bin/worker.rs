//! ob-worker: the entrypoint of a remote job.
//!
//! Reads `BUCKET_NAME`, `BLOB_NAME` and `RESULT_BLOB_NAME`, evaluates the
//! trial with a built-in objective and writes its outcome back. Exits
//! non-zero when the trial failed so the platform marks the job failed.

use clap::{Parser, ValueEnum};
use ob_scheduler::config::SchedulerConfig;
use ob_scheduler::init_tracing;
use ob_scheduler::objectives::BuiltinObjective;
use ob_scheduler::worker::{run_worker, WorkerEnv};
use ob_store::codec::TrialRecord;
use ob_store::{GcsConfig, GcsStore, LocalStore};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// `BUCKET_NAME` is a Cloud Storage bucket
    Gcs,
    /// `BUCKET_NAME` is a local directory
    Local,
}

#[derive(Parser, Debug)]
#[command(name = "ob-worker", version, about, long_about = None)]
struct Cli {
    /// Objective to evaluate
    #[arg(long, value_enum, default_value_t = BuiltinObjective::Quadratic)]
    objective: BuiltinObjective,

    /// Store backend behind BUCKET_NAME
    #[arg(long, value_enum, env = "OB_STORE", default_value_t = StoreKind::Gcs)]
    store: StoreKind,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let env = WorkerEnv::from_env()?;
    info!(
        objective = cli.objective.name(),
        bucket = %env.bucket,
        blob = %env.blob,
        "worker started"
    );

    let objective = |trial: &TrialRecord| cli.objective.evaluate(trial);
    let outcome = match cli.store {
        StoreKind::Gcs => {
            let config =
                GcsConfig::new(&env.bucket).with_access_token(SchedulerConfig::access_token());
            run_worker(&GcsStore::new(config), &env, objective).await?
        }
        StoreKind::Local => run_worker(&LocalStore::new(&env.bucket), &env, objective).await?,
    };

    if outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(trial = %outcome.trial, "trial failed");
        Ok(ExitCode::FAILURE)
    }
}
