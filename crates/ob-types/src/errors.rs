use thiserror::Error;

use crate::trial::TrialNumber;

/// Main error type for Optbatch
#[derive(Error, Debug)]
pub enum ObError {
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Poll error: {0}")]
    Poll(#[from] PollError),

    #[error("Outcome retrieval error: {0}")]
    OutcomeRetrieval(#[from] OutcomeRetrievalError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The execution platform refused a job request.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("job rejected: {message}")]
    Rejected { message: String },

    #[error("not authorized to submit jobs: {message}")]
    Unauthorized { message: String },

    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("transport failure while submitting: {message}")]
    Transport { message: String },
}

/// A status query failed. Treated as transient by the poller.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("transport failure while polling {job}: {message}")]
    Transport { job: String, message: String },

    #[error("job not found: {job}")]
    NotFound { job: String },

    #[error("malformed status for {job}: {message}")]
    Malformed { job: String, message: String },
}

/// A job reported success but its outcome could not be used.
#[derive(Error, Debug)]
pub enum OutcomeRetrievalError {
    #[error("no outcome stored at {key}")]
    Missing { key: String },

    #[error("reading outcome {key} failed: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("decoding outcome {key} failed: {source}")]
    Decode {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("outcome at {key} belongs to {found}, expected {expected}")]
    Mismatch {
        key: String,
        expected: String,
        found: String,
    },
}

/// Violations of the ask/tell contract. Fatal to the scheduler.
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("trial {number} was never asked")]
    UnknownTrial { number: TrialNumber },

    #[error("trial {number} was already told")]
    AlreadyTold { number: TrialNumber },

    #[error("search strategy {strategy} has no more candidates")]
    Exhausted { strategy: String },

    #[error("invalid search space: {message}")]
    InvalidSpace { message: String },

    #[error("invalid study: {message}")]
    InvalidStudy { message: String },
}

/// Durable object store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error on {key}: status {status}, {message}")]
    Http {
        key: String,
        status: u16,
        message: String,
    },

    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Trial state encoding failures.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported encoding version {found}, this build reads up to {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("expected a {expected} record, found {found}")]
    WrongKind { expected: String, found: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration: {message}")]
    Missing { message: String },

    #[error("cannot parse configuration: {message}")]
    Parse { message: String },

    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Result type alias for Optbatch operations
pub type ObResult<T> = Result<T, ObError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::ObError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($field:expr, $($arg:tt)*) => {
        $crate::ConfigError::Invalid {
            field: $field.to_string(),
            message: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = OptimizerError::AlreadyTold { number: 7 };
        assert!(error.to_string().contains("already told"));
        assert!(error.to_string().contains('7'));
    }

    #[test]
    fn test_error_conversion() {
        let err: ObError = SubmissionError::QuotaExceeded {
            message: "cpus".to_string(),
        }
        .into();

        match err {
            ObError::Submission(_) => (),
            _ => panic!("Expected Submission error"),
        }
    }

    #[test]
    fn test_outcome_error_keeps_source() {
        let err = OutcomeRetrievalError::Store {
            key: "s/trial_result_1.bin".into(),
            source: StoreError::NotFound {
                key: "s/trial_result_1.bin".into(),
            },
        };
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_macros() {
        let internal = internal_error!("Something went wrong: {}", 42);
        assert!(internal.to_string().contains("42"));
        let config = config_error!("n_jobs", "must be at least {}", 1);
        assert!(config.to_string().contains("n_jobs"));
    }
}
