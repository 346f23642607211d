//! # ob-batch
//!
//! The remote execution side of Optbatch.
//!
//! A [`JobTemplate`] turns each trial into a declarative [`JobSpec`]; a
//! [`JobClient`] submits it and reports its [`JobState`]; [`wait_for_job`]
//! polls a handle to a terminal [`JobTermination`] under a [`PollPolicy`].
//! Backends: Google Cloud Batch ([`GcpBatchClient`]) and local child
//! processes ([`LocalProcessClient`]).

mod client;
mod gcp;
mod job;
mod local;
mod poll;

pub use client::{JobClient, JobHandle, JobState};
pub use gcp::{GcpBatchClient, GcpBatchConfig};
pub use job::{
    AllocationPolicy, ComputeResource, JobSpec, JobTemplate, ProvisioningModel, ENV_BLOB_NAME,
    ENV_BUCKET_NAME, ENV_RESULT_BLOB_NAME,
};
pub use local::{LocalProcessClient, LocalProcessConfig};
pub use poll::{wait_for_job, Backoff, JobTermination, PollPolicy};
