//! Google Cloud Batch client over the v1 REST API.

use async_trait::async_trait;
use ob_types::{PollError, SubmissionError};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{JobClient, JobHandle, JobState};
use crate::job::JobSpec;

pub const DEFAULT_BATCH_ENDPOINT: &str = "https://batch.googleapis.com";

/// Where jobs are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpBatchConfig {
    pub project_id: String,
    pub region: String,
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_BATCH_ENDPOINT.to_string()
}

impl GcpBatchConfig {
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            access_token: None,
            endpoint: default_endpoint(),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// `projects/{project}/locations/{region}`
    pub fn parent(&self) -> String {
        ["projects", &self.project_id, "locations", &self.region].join("/")
    }
}

/// [`JobClient`] for Cloud Batch.
#[derive(Debug, Clone)]
pub struct GcpBatchClient {
    config: GcpBatchConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct JobResource {
    name: String,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Deserialize)]
struct JobStatus {
    #[serde(default)]
    state: Option<String>,
}

/// Request body for `jobs.create`.
pub(crate) fn batch_job_body(spec: &JobSpec) -> Value {
    let mut instance_policy = json!({
        "provisioningModel": spec.allocation.provisioning_model.as_str(),
    });
    if let Some(machine_type) = &spec.allocation.machine_type {
        instance_policy["machineType"] = json!(machine_type);
    }

    let mut allocation_policy = json!({
        "instances": [{ "policy": instance_policy }],
    });
    if let Some(email) = &spec.service_account {
        allocation_policy["serviceAccount"] = json!({ "email": email });
    }

    json!({
        "taskGroups": [{
            "taskSpec": {
                "runnables": [{
                    "container": { "imageUri": spec.image_uri },
                    "environment": { "variables": spec.environment },
                }],
                "computeResource": {
                    "cpuMilli": spec.compute.cpu_milli,
                    "memoryMib": spec.compute.memory_mib,
                },
                "maxRetryCount": spec.max_retry_count,
            },
        }],
        "allocationPolicy": allocation_policy,
        "labels": {
            "study": label_value(&spec.trial.study_name),
            "trial": spec.trial.number.to_string(),
        },
        "logsPolicy": { "destination": "CLOUD_LOGGING" },
    })
}

/// Labels allow lowercase letters, digits, '-' and '_' only, at most 63 chars.
fn label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(63)
        .collect()
}

pub(crate) fn parse_state(state: Option<&str>) -> JobState {
    match state {
        Some("QUEUED") | Some("SCHEDULED") => JobState::Pending,
        Some("RUNNING") | Some("DELETION_IN_PROGRESS") => JobState::Running,
        Some("SUCCEEDED") => JobState::Succeeded,
        Some("FAILED") => JobState::Failed,
        _ => JobState::Unknown,
    }
}

impl GcpBatchClient {
    pub fn new(config: GcpBatchConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, String> {
        let base = Url::parse(&self.config.endpoint).map_err(|e| e.to_string())?;
        base.join(&format!("v1/{path}")).map_err(|e| e.to_string())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn submission_error(response: reqwest::Response) -> SubmissionError {
    let status = response.status();
    let message = format!("{status}: {}", response.text().await.unwrap_or_default());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SubmissionError::Unauthorized { message },
        StatusCode::TOO_MANY_REQUESTS => SubmissionError::QuotaExceeded { message },
        _ => SubmissionError::Rejected { message },
    }
}

#[async_trait]
impl JobClient for GcpBatchClient {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, SubmissionError> {
        let job_id = format!("job-{}", Uuid::new_v4().simple());
        let mut url = self
            .url(&format!("{}/jobs", self.config.parent()))
            .map_err(|message| SubmissionError::Rejected { message })?;
        url.query_pairs_mut().append_pair("job_id", &job_id);

        let response = self
            .authorize(self.http.post(url))
            .json(&batch_job_body(spec))
            .send()
            .await
            .map_err(|e| SubmissionError::Transport {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(submission_error(response).await);
        }

        let job: JobResource = response.json().await.map_err(|e| SubmissionError::Transport {
            message: format!("unreadable create response: {e}"),
        })?;
        info!(job = %job.name, trial = %spec.trial, "batch job created");
        Ok(JobHandle::new(job.name))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobState, PollError> {
        let url = self.url(&handle.id).map_err(|message| PollError::Malformed {
            job: handle.id.clone(),
            message,
        })?;

        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| PollError::Transport {
                job: handle.id.clone(),
                message: e.to_string(),
            })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(PollError::NotFound {
                    job: handle.id.clone(),
                })
            }
            s => {
                return Err(PollError::Transport {
                    job: handle.id.clone(),
                    message: format!("status {s}"),
                })
            }
        }

        let job: JobResource = response.json().await.map_err(|e| PollError::Malformed {
            job: handle.id.clone(),
            message: e.to_string(),
        })?;
        let raw = job.status.and_then(|s| s.state);
        let state = parse_state(raw.as_deref());
        debug!(job = %job.name, state = ?raw, "batch job polled");
        Ok(state)
    }
}
