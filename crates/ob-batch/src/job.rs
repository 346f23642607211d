//! Declarative description of one remote unit of work.

use ob_types::TrialRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variable naming the bucket the worker reads and writes.
pub const ENV_BUCKET_NAME: &str = "BUCKET_NAME";
/// Environment variable naming the encoded trial object.
pub const ENV_BLOB_NAME: &str = "BLOB_NAME";
/// Environment variable naming where the worker writes its outcome.
pub const ENV_RESULT_BLOB_NAME: &str = "RESULT_BLOB_NAME";

/// Resource request for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResource {
    /// CPU in thousandths of a core (2000 = two cores).
    pub cpu_milli: u32,
    pub memory_mib: u32,
}

impl Default for ComputeResource {
    fn default() -> Self {
        Self {
            cpu_milli: 1000,
            memory_mib: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningModel {
    #[default]
    Standard,
    Spot,
    Preemptible,
}

impl ProvisioningModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::Spot => "SPOT",
            Self::Preemptible => "PREEMPTIBLE",
        }
    }
}

/// Machine selection for the VM that runs the task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocationPolicy {
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub provisioning_model: ProvisioningModel,
}

/// Everything the platform needs to run one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub trial: TrialRef,
    pub image_uri: String,
    pub environment: BTreeMap<String, String>,
    pub compute: ComputeResource,
    pub allocation: AllocationPolicy,
    pub service_account: Option<String>,
    /// Always zero: a failed task must surface to the scheduler, not be
    /// retried underneath it.
    pub max_retry_count: u32,
}

impl JobSpec {
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }
}

/// Per-study part of a job description; [`JobTemplate::build`] fills in the
/// per-trial locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub image_uri: String,
    pub compute: ComputeResource,
    pub allocation: AllocationPolicy,
    pub service_account: Option<String>,
    /// Extra variables passed to every worker.
    pub extra_env: BTreeMap<String, String>,
}

impl JobTemplate {
    pub fn new(image_uri: impl Into<String>) -> Self {
        Self {
            image_uri: image_uri.into(),
            compute: ComputeResource::default(),
            allocation: AllocationPolicy::default(),
            service_account: None,
            extra_env: BTreeMap::new(),
        }
    }

    /// Artifact Registry image path of the worker container.
    pub fn artifact_registry_uri(
        region: &str,
        project_id: &str,
        repository: &str,
        image_name_base: &str,
    ) -> String {
        [
            format!("{region}-docker.pkg.dev"),
            project_id.to_string(),
            repository.to_string(),
            format!("{image_name_base}-job:latest"),
        ]
        .join("/")
    }

    pub fn with_compute(mut self, compute: ComputeResource) -> Self {
        self.compute = compute;
        self
    }

    pub fn with_allocation(mut self, allocation: AllocationPolicy) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn with_service_account(mut self, email: Option<String>) -> Self {
        self.service_account = email;
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(name.into(), value.into());
        self
    }

    pub fn build(&self, trial: TrialRef, bucket: &str, blob: &str, result_blob: &str) -> JobSpec {
        let mut environment = self.extra_env.clone();
        environment.insert(ENV_BUCKET_NAME.to_string(), bucket.to_string());
        environment.insert(ENV_BLOB_NAME.to_string(), blob.to_string());
        environment.insert(ENV_RESULT_BLOB_NAME.to_string(), result_blob.to_string());

        JobSpec {
            trial,
            image_uri: self.image_uri.clone(),
            environment,
            compute: self.compute,
            allocation: self.allocation.clone(),
            service_account: self.service_account.clone(),
            max_retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_registry_uri_layout() {
        let uri = JobTemplate::artifact_registry_uri("us-central1", "proj", "repo", "optbatch");
        assert_eq!(uri, "us-central1-docker.pkg.dev/proj/repo/optbatch-job:latest");
    }

    #[test]
    fn build_sets_worker_environment() {
        let template = JobTemplate::new("img:latest")
            .with_env("RUST_LOG", "debug")
            .with_env(ENV_BLOB_NAME, "overridden");
        let spec = template.build(
            TrialRef {
                study_name: "s".into(),
                number: 2,
            },
            "bucket",
            "s/trial_2.bin",
            "s/trial_result_2.bin",
        );

        assert_eq!(spec.env(ENV_BUCKET_NAME), Some("bucket"));
        assert_eq!(spec.env(ENV_BLOB_NAME), Some("s/trial_2.bin"));
        assert_eq!(spec.env(ENV_RESULT_BLOB_NAME), Some("s/trial_result_2.bin"));
        assert_eq!(spec.env("RUST_LOG"), Some("debug"));
        assert_eq!(spec.max_retry_count, 0);
    }

    #[test]
    fn provisioning_model_config_spelling() {
        let policy: AllocationPolicy =
            serde_json::from_str(r#"{"machine_type":"e2-standard-2","provisioning_model":"SPOT"}"#)
                .unwrap();
        assert_eq!(policy.provisioning_model, ProvisioningModel::Spot);
        assert_eq!(policy.provisioning_model.as_str(), "SPOT");
    }
}
