//! Repeated status polling of a submitted job.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{JobClient, JobHandle, JobState};

/// How the wait between polls evolves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max_interval: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
    /// Consecutive failed status queries tolerated before giving up.
    pub max_poll_errors: u32,
    /// Wall-clock budget for one job; `None` waits forever.
    pub max_job_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            backoff: Backoff::Fixed,
            max_poll_errors: 5,
            max_job_duration: None,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                factor,
                max_interval,
            } => current.mul_f64(factor.max(1.0)).min(max_interval.max(self.interval)),
        }
    }
}

/// How waiting on a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTermination {
    Succeeded,
    Failed,
    PollErrorsExhausted { attempts: u32, last_error: String },
    TimedOut { elapsed: Duration },
}

impl JobTermination {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Why the job counts as failed, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Succeeded => None,
            Self::Failed => Some("remote job failed".to_string()),
            Self::PollErrorsExhausted {
                attempts,
                last_error,
            } => Some(format!(
                "gave up after {attempts} failed status queries: {last_error}"
            )),
            Self::TimedOut { elapsed } => Some(format!(
                "job exceeded its time budget ({}s)",
                elapsed.as_secs()
            )),
        }
    }
}

/// Poll `handle` until it reaches a terminal state or the policy gives up.
pub async fn wait_for_job<C: JobClient + ?Sized>(
    client: &C,
    handle: &JobHandle,
    policy: &PollPolicy,
) -> JobTermination {
    let started = Instant::now();
    let mut delay = policy.interval;
    let mut consecutive_errors = 0u32;

    loop {
        match client.poll(handle).await {
            Ok(JobState::Succeeded) => return JobTermination::Succeeded,
            Ok(JobState::Failed) => return JobTermination::Failed,
            Ok(state) => {
                consecutive_errors = 0;
                debug!(job = %handle, ?state, "job not finished");
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    job = %handle,
                    attempt = consecutive_errors,
                    budget = policy.max_poll_errors,
                    error = %e,
                    "status query failed"
                );
                if consecutive_errors >= policy.max_poll_errors {
                    return JobTermination::PollErrorsExhausted {
                        attempts: consecutive_errors,
                        last_error: e.to_string(),
                    };
                }
            }
        }

        if let Some(budget) = policy.max_job_duration {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                warn!(job = %handle, elapsed_secs = elapsed.as_secs(), "job timed out, abandoning it");
                return JobTermination::TimedOut { elapsed };
            }
        }

        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use async_trait::async_trait;
    use ob_types::{PollError, SubmissionError};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of poll results, repeating the last one.
    struct Script {
        steps: Mutex<VecDeque<Result<JobState, ()>>>,
        polls: Mutex<u32>,
    }

    impl Script {
        fn new(steps: Vec<Result<JobState, ()>>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                polls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl JobClient for Script {
        async fn submit(&self, _spec: &JobSpec) -> Result<JobHandle, SubmissionError> {
            Ok(JobHandle::new("scripted"))
        }

        async fn poll(&self, handle: &JobHandle) -> Result<JobState, PollError> {
            *self.polls.lock() += 1;
            let mut steps = self.steps.lock();
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            };
            match step {
                Some(Ok(state)) => Ok(state),
                _ => Err(PollError::Transport {
                    job: handle.id.clone(),
                    message: "connection reset".into(),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_pending_and_running() {
        let client = Script::new(vec![
            Ok(JobState::Pending),
            Ok(JobState::Unknown),
            Ok(JobState::Running),
            Ok(JobState::Succeeded),
        ]);
        let policy = PollPolicy::fixed(Duration::from_secs(10));

        let start = Instant::now();
        let done = wait_for_job(&client, &JobHandle::new("j"), &policy).await;
        assert_eq!(done, JobTermination::Succeeded);
        assert_eq!(*client.polls.lock(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let client = Script::new(vec![
            Err(()),
            Err(()),
            Ok(JobState::Running),
            Err(()),
            Ok(JobState::Failed),
        ]);
        let policy = PollPolicy {
            max_poll_errors: 3,
            ..PollPolicy::fixed(Duration::from_secs(1))
        };
        let done = wait_for_job(&client, &JobHandle::new("j"), &policy).await;
        assert_eq!(done, JobTermination::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn error_budget_exhaustion_fails_the_job() {
        let client = Script::new(vec![Ok(JobState::Running), Err(())]);
        let policy = PollPolicy {
            max_poll_errors: 3,
            ..PollPolicy::fixed(Duration::from_secs(1))
        };
        let done = wait_for_job(&client, &JobHandle::new("j"), &policy).await;
        match done {
            JobTermination::PollErrorsExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected termination: {other:?}"),
        }
        assert_eq!(*client.polls.lock(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_synthesizes_failure() {
        let client = Script::new(vec![Ok(JobState::Running)]);
        let policy = PollPolicy {
            max_job_duration: Some(Duration::from_secs(60)),
            ..PollPolicy::fixed(Duration::from_secs(10))
        };
        let done = wait_for_job(&client, &JobHandle::new("j"), &policy).await;
        assert!(matches!(
            done,
            JobTermination::TimedOut { elapsed } if elapsed >= Duration::from_secs(60)
        ));
        assert!(done.failure_reason().unwrap().contains("60s"));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = PollPolicy {
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_interval: Duration::from_secs(25),
            },
            ..PollPolicy::fixed(Duration::from_secs(5))
        };
        let mut delay = policy.interval;
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = policy.next_delay(delay);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![10, 20, 25, 25]);
    }
}
