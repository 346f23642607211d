//! # ob-store
//!
//! Everything that crosses the process boundary between the scheduler and
//! its remote workers: the [`ObjectStore`] trait and its backends, the
//! deterministic [`StoreKeys`], the versioned trial/outcome [`codec`], and
//! study checkpointing.

pub mod checkpoint;
pub mod codec;
mod gcs;
mod keys;
mod store;

pub use checkpoint::{Checkpointer, LoadError};
pub use gcs::{GcsConfig, GcsStore};
pub use keys::StoreKeys;
pub use store::{LocalStore, MemoryStore, ObjectStore};
