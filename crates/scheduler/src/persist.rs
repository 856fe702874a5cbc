//! Quota-aware persistence of the run state and the variable store.

use std::sync::Arc;

use tracing::{debug, info, warn};
use variable_store::{VariableLimits, VariableStore};

use crate::error::StorageError;
use crate::model::RunState;
use crate::storage::{StateStorage, STATE_KEY, VARIABLES_KEY};

/// Prefix of cached sheet downloads, purged first when space runs low.
pub const CACHE_KEY_PREFIX: &str = "csv_cache:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaLow {
    pub bytes_in_use: u64,
    pub quota: u64,
}

/// What a [`Persistence::flush`] managed to write.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub state_written: bool,
    pub variables_written: bool,
    /// Set when the write would have left less than the safety margin
    pub low_quota: Option<QuotaLow>,
    /// Cache entries removed to make room
    pub purged: usize,
    pub errors: Vec<StorageError>,
}

pub struct Persistence {
    storage: Arc<dyn StateStorage>,
    safety_margin: u64,
}

impl Persistence {
    pub fn new(storage: Arc<dyn StateStorage>, safety_margin: u64) -> Self {
        Self {
            storage,
            safety_margin,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StateStorage> {
        &self.storage
    }

    pub async fn load_state(&self) -> Result<Option<RunState>, StorageError> {
        match self.storage.load(STATE_KEY).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn load_variables(
        &self,
        limits: VariableLimits,
    ) -> Result<Option<VariableStore>, StorageError> {
        match self.storage.load(VARIABLES_KEY).await? {
            Some(bytes) => VariableStore::from_json(limits, &bytes)
                .map(Some)
                .map_err(|err| StorageError::Corrupt(err.to_string())),
            None => Ok(None),
        }
    }

    /// `Some` when writing `incoming` bytes would cut into the safety margin.
    pub async fn check_quota(&self, incoming: u64) -> Result<Option<QuotaLow>, StorageError> {
        let Some(quota) = self.storage.quota() else {
            return Ok(None);
        };
        let bytes_in_use = self.storage.bytes_in_use().await?;
        if bytes_in_use + incoming + self.safety_margin > quota {
            return Ok(Some(QuotaLow {
                bytes_in_use,
                quota,
            }));
        }
        Ok(None)
    }

    /// Removes every cached sheet download. Returns how many were dropped.
    pub async fn purge_caches(&self) -> Result<usize, StorageError> {
        let mut purged = 0;
        for key in self.storage.keys().await? {
            if key.starts_with(CACHE_KEY_PREFIX) {
                self.storage.remove(&key).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "purged cached sheet data");
        }
        Ok(purged)
    }

    /// Writes the dirty blobs.
    ///
    /// The run state is critical and is always attempted. When space is low
    /// the caches are purged and the variables write is skipped.
    pub async fn flush(&self, state: Option<&[u8]>, variables: Option<&[u8]>) -> FlushReport {
        let mut report = FlushReport::default();
        let incoming = state.map_or(0, <[u8]>::len) + variables.map_or(0, <[u8]>::len);

        match self.check_quota(incoming as u64).await {
            Ok(low) => report.low_quota = low,
            Err(err) => report.errors.push(err),
        }
        if let Some(low) = report.low_quota {
            warn!(
                bytes_in_use = low.bytes_in_use,
                quota = low.quota,
                "storage quota low, skipping non-critical writes"
            );
            match self.purge_caches().await {
                Ok(purged) => report.purged = purged,
                Err(err) => report.errors.push(err),
            }
        }

        if let Some(bytes) = state {
            match self.storage.save(STATE_KEY, bytes).await {
                Ok(()) => report.state_written = true,
                Err(err) => {
                    warn!("Failed to persist run state: {}", err);
                    report.errors.push(err);
                }
            }
        }
        if let Some(bytes) = variables {
            if report.low_quota.is_some() {
                debug!("variables write deferred");
            } else {
                match self.storage.save(VARIABLES_KEY, bytes).await {
                    Ok(()) => report.variables_written = true,
                    Err(err) => {
                        warn!("Failed to persist variables: {}", err);
                        report.errors.push(err);
                    }
                }
            }
        }
        report
    }
}
