//! Bridge timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Per-attempt budget of one message delivery
    pub send_timeout_ms: u64,
    /// Delivery attempts, including the first
    pub send_retries: u32,
    /// Backoff base; attempt `i` waits `retry_base_ms * 2^i`
    pub retry_base_ms: u64,
    /// Settle time after injecting the content script
    pub injection_wait_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
            send_retries: 3,
            retry_base_ms: 500,
            injection_wait_ms: 200,
        }
    }
}

impl BridgeConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    pub fn injection_wait(&self) -> Duration {
        Duration::from_millis(self.injection_wait_ms)
    }
}
