//! ob-scheduler: run a study, dispatching each trial as a remote job.

use anyhow::Context;
use clap::Parser;
use ob_batch::{GcpBatchClient, LocalProcessClient};
use ob_scheduler::{init_tracing, run_study, Backend, SchedulerConfig};
use ob_store::{GcsStore, LocalStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ob-scheduler", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to the CONFIG environment variable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Continue the study from its last checkpoint
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = SchedulerConfig::load(cli.config.as_deref())?;
    config.validate()?;
    info!(
        config = %serde_json::to_string(&config).context("rendering configuration")?,
        "configuration loaded"
    );

    let summary = match config.backend {
        Backend::Gcp => {
            let store = Arc::new(GcsStore::new(config.gcs_config()));
            let client = Arc::new(GcpBatchClient::new(config.batch_config()));
            run_study(&config, client, store, cli.resume).await?
        }
        Backend::Local => {
            let local = config
                .local
                .as_ref()
                .context("the local backend needs a `local` section")?;
            let store = Arc::new(LocalStore::new(&local.store_root));
            let process = config
                .local_process_config()
                .context("the local backend needs a `local` section")?;
            let client = Arc::new(LocalProcessClient::new(process));
            run_study(&config, client, store, cli.resume).await?
        }
    };

    match &summary.best {
        Some(best) => info!(
            trial = best.number,
            value = ?best.values,
            params = %best.params_json(),
            asked = summary.asked,
            "best trial"
        ),
        None => info!(asked = summary.asked, "no trial succeeded"),
    }
    Ok(())
}
