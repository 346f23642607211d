//! Scheduler configuration.
//!
//! Read as JSON from the `CONFIG` environment variable, or from a file given
//! on the command line. Field names follow the deployment config the worker
//! image and bucket are provisioned with.

use ob_batch::{
    AllocationPolicy, Backoff, ComputeResource, GcpBatchConfig, JobTemplate, LocalProcessConfig,
    PollPolicy,
};
use ob_optimizer::{SearchSpace, StrategyKind};
use ob_store::GcsConfig;
use ob_types::{config_error, ConfigError, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the JSON config.
pub const CONFIG_ENV: &str = "CONFIG";
/// Environment variable holding an OAuth2 access token for Google APIs.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Tells `ob-worker` which store backend `BUCKET_NAME` refers to.
pub const WORKER_STORE_ENV: &str = "OB_STORE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Cloud Batch jobs exchanging data through a Cloud Storage bucket.
    #[default]
    Gcp,
    /// Child processes exchanging data through a local directory.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    pub store_root: PathBuf,
    pub worker_program: PathBuf,
    #[serde(default)]
    pub worker_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub factor: f64,
    pub max_interval_seconds: u64,
}

/// What to optimize and how to search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_study_name")]
    pub name: String,
    #[serde(default = "default_directions")]
    pub directions: Vec<Direction>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_exploration_weight")]
    pub exploration_weight: f64,
    #[serde(default = "default_grid_steps")]
    pub grid_steps: usize,
    #[serde(default = "default_search_space")]
    pub search_space: SearchSpace,
}

fn default_study_name() -> String {
    "example_study".to_string()
}

fn default_directions() -> Vec<Direction> {
    vec![Direction::Minimize]
}

fn default_exploration_weight() -> f64 {
    0.3
}

fn default_grid_steps() -> usize {
    5
}

fn default_search_space() -> SearchSpace {
    SearchSpace::new().add_float("x", -100.0, 100.0)
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            name: default_study_name(),
            directions: default_directions(),
            strategy: StrategyKind::default(),
            seed: None,
            exploration_weight: default_exploration_weight(),
            grid_steps: default_grid_steps(),
            search_space: default_search_space(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub bucket_name: String,
    /// Successful trials the study should end with. On resume, successes
    /// restored from the checkpoint count toward it.
    pub n_trials: usize,
    /// Maximum concurrently dispatched trials.
    pub n_jobs: usize,

    // Worker placement
    #[serde(default, alias = "compute_resorce")]
    pub compute_resource: ComputeResource,
    #[serde(default)]
    pub allocation_policy: AllocationPolicy,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub image_name_base: String,
    /// Overrides the Artifact Registry path built from the fields above.
    #[serde(default)]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub worker_env: BTreeMap<String, String>,

    // Polling
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub poll_backoff: Option<BackoffConfig>,
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
    #[serde(default)]
    pub max_job_duration_seconds: Option<u64>,

    /// Checkpoint every this many told trials; 0 only checkpoints at shutdown.
    #[serde(default = "default_backup_every")]
    pub backup_every: usize,

    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub local: Option<LocalBackendConfig>,

    #[serde(default)]
    pub study: StudyConfig,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_poll_errors() -> u32 {
    5
}

fn default_backup_every() -> usize {
    10
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Load from `path` if given, otherwise from the `CONFIG` variable.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Missing {
                    message: format!("cannot read {}: {e}", path.display()),
                })?;
                Self::from_json(&json)
            }
            None => {
                let json = std::env::var(CONFIG_ENV).map_err(|_| ConfigError::Missing {
                    message: format!("set {CONFIG_ENV} or pass --config"),
                })?;
                Self::from_json(&json)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_trials == 0 {
            return Err(config_error!("n_trials", "must be at least 1"));
        }
        if self.n_jobs == 0 {
            return Err(config_error!("n_jobs", "must be at least 1"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(config_error!("poll_interval_seconds", "must be at least 1"));
        }
        if self.study.directions.is_empty() {
            return Err(config_error!("study.directions", "needs at least one direction"));
        }
        self.study
            .search_space
            .validate()
            .map_err(|e| config_error!("study.search_space", "{e}"))?;
        if let Some(backoff) = &self.poll_backoff {
            if !(backoff.factor >= 1.0) {
                return Err(config_error!("poll_backoff.factor", "must be >= 1.0"));
            }
        }

        match self.backend {
            Backend::Gcp => {
                if self.bucket_name.is_empty() {
                    return Err(config_error!("bucket_name", "required for the gcp backend"));
                }
                if self.project_id.is_empty() || self.region.is_empty() {
                    return Err(config_error!(
                        "project_id",
                        "project_id and region are required for the gcp backend"
                    ));
                }
                if self.image_uri.is_none()
                    && (self.repository.is_empty() || self.image_name_base.is_empty())
                {
                    return Err(config_error!(
                        "image_uri",
                        "give image_uri or repository and image_name_base"
                    ));
                }
            }
            Backend::Local => {
                if self.local.is_none() {
                    return Err(config_error!("local", "required for the local backend"));
                }
            }
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let backoff = match self.poll_backoff {
            Some(b) => Backoff::Exponential {
                factor: b.factor,
                max_interval: Duration::from_secs(b.max_interval_seconds),
            },
            None => Backoff::Fixed,
        };
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_seconds),
            backoff,
            max_poll_errors: self.max_poll_errors.max(1),
            max_job_duration: self.max_job_duration_seconds.map(Duration::from_secs),
        }
    }

    pub fn image_uri(&self) -> String {
        match &self.image_uri {
            Some(uri) => uri.clone(),
            None => JobTemplate::artifact_registry_uri(
                &self.region,
                &self.project_id,
                &self.repository,
                &self.image_name_base,
            ),
        }
    }

    /// The bucket value handed to workers: the GCS bucket, or the store
    /// directory for the local backend.
    pub fn worker_bucket(&self) -> String {
        match (self.backend, &self.local) {
            (Backend::Local, Some(local)) => local.store_root.display().to_string(),
            _ => self.bucket_name.clone(),
        }
    }

    pub fn job_template(&self) -> JobTemplate {
        let store = match self.backend {
            Backend::Gcp => "gcs",
            Backend::Local => "local",
        };
        let mut template = JobTemplate::new(self.image_uri())
            .with_compute(self.compute_resource)
            .with_allocation(self.allocation_policy.clone())
            .with_service_account(self.service_account.clone())
            .with_env(WORKER_STORE_ENV, store);
        for (name, value) in &self.worker_env {
            template = template.with_env(name, value);
        }
        template
    }

    pub fn access_token() -> Option<String> {
        std::env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty())
    }

    pub fn gcs_config(&self) -> GcsConfig {
        GcsConfig::new(&self.bucket_name).with_access_token(Self::access_token())
    }

    pub fn batch_config(&self) -> GcpBatchConfig {
        GcpBatchConfig::new(&self.project_id, &self.region).with_access_token(Self::access_token())
    }

    pub fn local_process_config(&self) -> Option<LocalProcessConfig> {
        self.local.as_ref().map(|local| LocalProcessConfig {
            program: local.worker_program.clone(),
            args: local.worker_args.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_batch::ProvisioningModel;

    const DEPLOYMENT_CONFIG: &str = r#"{
        "bucket_name": "opt-bucket",
        "n_trials": 20,
        "n_jobs": 4,
        "project_id": "proj",
        "region": "us-central1",
        "repository": "repo",
        "image_name_base": "optbatch",
        "service_account": "runner@proj.iam.gserviceaccount.com",
        "compute_resorce": {"cpu_milli": 2000, "memory_mib": 2048},
        "allocation_policy": {"machine_type": "e2-standard-2", "provisioning_model": "SPOT"}
    }"#;

    #[test]
    fn parses_deployment_config_with_defaults() {
        let config = SchedulerConfig::from_json(DEPLOYMENT_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.compute_resource.cpu_milli, 2000);
        assert_eq!(
            config.allocation_policy.provisioning_model,
            ProvisioningModel::Spot
        );
        assert_eq!(config.poll_interval_seconds, 10);
        assert_eq!(config.backend, Backend::Gcp);
        assert_eq!(config.study.name, "example_study");
        assert_eq!(config.study.directions, vec![Direction::Minimize]);
        assert_eq!(
            config.image_uri(),
            "us-central1-docker.pkg.dev/proj/repo/optbatch-job:latest"
        );
        assert_eq!(config.poll_policy().interval, Duration::from_secs(10));
        assert_eq!(config.poll_policy().backoff, Backoff::Fixed);
    }

    #[test]
    fn job_template_carries_worker_store() {
        let config = SchedulerConfig::from_json(DEPLOYMENT_CONFIG).unwrap();
        let template = config.job_template();
        assert_eq!(template.extra_env.get(WORKER_STORE_ENV).map(String::as_str), Some("gcs"));
        assert_eq!(template.compute.memory_mib, 2048);
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut config = SchedulerConfig::from_json(DEPLOYMENT_CONFIG).unwrap();
        config.n_jobs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_jobs"));
    }

    #[test]
    fn local_backend_requires_local_section() {
        let mut config = SchedulerConfig::from_json(DEPLOYMENT_CONFIG).unwrap();
        config.backend = Backend::Local;
        assert!(config.validate().is_err());

        config.local = Some(LocalBackendConfig {
            store_root: "/tmp/optbatch".into(),
            worker_program: "ob-worker".into(),
            worker_args: vec![],
        });
        config.validate().unwrap();
        assert_eq!(config.worker_bucket(), "/tmp/optbatch");
    }

    #[test]
    fn backoff_and_timeout_map_into_poll_policy() {
        let mut config = SchedulerConfig::from_json(DEPLOYMENT_CONFIG).unwrap();
        config.poll_backoff = Some(BackoffConfig {
            factor: 1.5,
            max_interval_seconds: 120,
        });
        config.max_job_duration_seconds = Some(3600);
        let policy = config.poll_policy();
        assert_eq!(policy.max_job_duration, Some(Duration::from_secs(3600)));
        assert!(matches!(policy.backoff, Backoff::Exponential { .. }));
    }

    #[test]
    fn invalid_search_space_is_a_config_error() {
        let json = DEPLOYMENT_CONFIG.replacen(
            "\"n_jobs\": 4,",
            r#""n_jobs": 4, "study": {"search_space": []},"#,
            1,
        );
        let config = SchedulerConfig::from_json(&json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, DEPLOYMENT_CONFIG).unwrap();
        let config = SchedulerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.n_jobs, 4);

        assert!(SchedulerConfig::load(Some(&dir.path().join("missing.json"))).is_err());
        assert!(SchedulerConfig::from_json("{").is_err());
    }
}
