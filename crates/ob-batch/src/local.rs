//! Runs each job as a child process on this machine.
//!
//! Stands in for the remote platform during development: the worker binary
//! gets the same environment a container would, and its exit status is the
//! terminal job state.

use async_trait::async_trait;
use ob_types::{PollError, SubmissionError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{JobClient, JobHandle, JobState};
use crate::job::JobSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalProcessConfig {
    /// Worker executable, e.g. the `ob-worker` binary.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// [`JobClient`] backed by `tokio::process`.
///
/// A job is forgotten once its terminal state has been returned; polling it
/// again is [`PollError::NotFound`].
pub struct LocalProcessClient {
    config: LocalProcessConfig,
    jobs: Mutex<HashMap<String, Child>>,
}

impl LocalProcessClient {
    pub fn new(config: LocalProcessConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Jobs whose process has not been observed to exit yet.
    pub fn running(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[async_trait]
impl JobClient for LocalProcessClient {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, SubmissionError> {
        let id = format!("local-{}", Uuid::new_v4().simple());
        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SubmissionError::Rejected {
                message: format!("cannot start {}: {e}", self.config.program.display()),
            })?;

        info!(job = %id, pid = ?child.id(), trial = %spec.trial, "local worker started");
        self.jobs.lock().insert(id.clone(), child);
        Ok(JobHandle::new(id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobState, PollError> {
        let mut jobs = self.jobs.lock();
        let child = jobs.get_mut(&handle.id).ok_or_else(|| PollError::NotFound {
            job: handle.id.clone(),
        })?;

        match child.try_wait() {
            Ok(None) => Ok(JobState::Running),
            Ok(Some(status)) => {
                let state = if status.success() {
                    JobState::Succeeded
                } else {
                    warn!(job = %handle.id, %status, "local worker exited unsuccessfully");
                    JobState::Failed
                };
                debug!(job = %handle.id, ?state, "local worker finished");
                jobs.remove(&handle.id);
                Ok(state)
            }
            Err(e) => Err(PollError::Transport {
                job: handle.id.clone(),
                message: e.to_string(),
            }),
        }
    }
}
