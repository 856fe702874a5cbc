//! Coordinator timing and limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pause between a completed item and the next dispatch
    pub batch_item_delay_ms: u64,
    /// Watchdog for an expected navigation that never finishes loading
    pub navigation_timeout_ms: u64,
    /// Settle time after load-complete before re-dispatching the item
    pub navigation_resume_delay_ms: u64,
    /// Navigations a single item may trigger before the run pauses
    pub max_navigations_per_item: u32,
    /// Re-dispatch attempts after a connection failure
    pub connect_retries: u32,
    pub reconnect_backoff_ms: u64,
    /// Debounce window of non-critical writes
    pub persist_debounce_ms: u64,
    /// Free space kept in reserve before a write is considered quota-critical
    pub storage_safety_margin_bytes: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_item_delay_ms: 1_000,
            navigation_timeout_ms: 30_000,
            navigation_resume_delay_ms: 1_500,
            max_navigations_per_item: 5,
            connect_retries: 2,
            reconnect_backoff_ms: 1_000,
            persist_debounce_ms: 500,
            storage_safety_margin_bytes: 100_000,
        }
    }
}

impl RunConfig {
    pub fn batch_item_delay(&self) -> Duration {
        Duration::from_millis(self.batch_item_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn navigation_resume_delay(&self) -> Duration {
        Duration::from_millis(self.navigation_resume_delay_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}
