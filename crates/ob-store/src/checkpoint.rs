//! Periodic study backups.

use ob_optimizer::StudySnapshot;
use ob_types::{CodecError, StoreError};
use tracing::{info, warn};

use crate::keys::StoreKeys;
use crate::store::ObjectStore;

/// Writes [`StudySnapshot`]s to the study's checkpoint key.
///
/// A backup is taken every `every` recorded trials and once more at
/// shutdown. Failed writes are logged and never propagate.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    key: String,
    every: usize,
    since_last: usize,
    saves: usize,
}

impl Checkpointer {
    /// `every == 0` disables periodic backups; the final one still runs.
    pub fn new(keys: &StoreKeys, every: usize) -> Self {
        Self {
            key: keys.checkpoint(),
            every,
            since_last: 0,
            saves: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of successful backups written so far.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Count one recorded trial; `true` when a periodic backup is due.
    pub fn record(&mut self) -> bool {
        self.since_last += 1;
        self.every > 0 && self.since_last >= self.every
    }

    /// Write a backup. Returns whether it landed.
    pub async fn save<S: ObjectStore + ?Sized>(&mut self, store: &S, snapshot: &StudySnapshot) -> bool {
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %self.key, error = %e, "could not encode study checkpoint");
                return false;
            }
        };

        match store.put(&self.key, bytes).await {
            Ok(()) => {
                self.since_last = 0;
                self.saves += 1;
                info!(
                    key = %self.key,
                    trials = snapshot.trials.len(),
                    "study checkpoint written"
                );
                true
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "study checkpoint failed, keeping history in memory");
                false
            }
        }
    }

    /// Read a previously written backup, `Ok(None)` if there is none.
    pub async fn load<S: ObjectStore + ?Sized>(
        store: &S,
        keys: &StoreKeys,
    ) -> Result<Option<StudySnapshot>, LoadError> {
        let key = keys.checkpoint();
        match store.get(&key).await {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(CodecError::from)?;
                Ok(Some(snapshot))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Why a checkpoint could not be read back.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
