use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ob_types::{PollError, SubmissionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::job::JobSpec;

/// Platform-assigned identity of one dispatched trial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            submitted_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Status reported by the execution platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The platform returned a state we do not recognise; keep polling.
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Submission and status capability of a remote execution platform.
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, SubmissionError>;

    /// One non-blocking status check. Repetition and waiting are the
    /// caller's business.
    async fn poll(&self, handle: &JobHandle) -> Result<JobState, PollError>;
}

#[async_trait]
impl<C: JobClient + ?Sized> JobClient for Arc<C> {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, SubmissionError> {
        (**self).submit(spec).await
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobState, PollError> {
        (**self).poll(handle).await
    }
}
