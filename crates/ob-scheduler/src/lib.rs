//! # ob-scheduler
//!
//! The control loop of Optbatch: asks the optimizer for trials, dispatches
//! each one as a remote job, keeps at most `n_jobs` in flight, and tells the
//! optimizer every outcome in arrival order until `n_trials` successes are
//! in. Also hosts the worker runtime that remote jobs execute.

pub mod config;
mod dispatch;
pub mod objectives;
pub mod runner;
pub mod scheduler;
pub mod worker;

pub use config::{Backend, SchedulerConfig, StudyConfig};
pub use dispatch::{Completion, TrialFailure};
pub use runner::run_study;
pub use scheduler::{InFlight, RunSummary, Scheduler, SchedulerSettings};

use tracing_subscriber::EnvFilter;

/// Install the stderr `fmt` subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
