//! Failure handling strategies

use command_lang::ErrorPolicy;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::errors::FlowError;

/// What to do with a command whose retries are exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Missing element: logged as `[SKIPPED]`, execution continues
    SkipMissing,

    /// `skip` policy
    Skip(String),

    /// `pause` policy: wait for the operator, then continue
    Pause(String),

    /// `stop` policy: abort the run
    Stop(String),
}

impl FailureDecision {
    /// Line sent with `COMMAND_ERROR`
    pub fn report_line(&self) -> String {
        match self {
            FailureDecision::SkipMissing => "[SKIPPED] Element not found".to_string(),
            FailureDecision::Skip(msg) => format!("[SKIP] {}", msg),
            FailureDecision::Pause(msg) => format!("[PAUSE] {}", msg),
            FailureDecision::Stop(msg) => format!("[STOP] {}", msg),
        }
    }
}

/// Failure handler trait
pub trait FailureHandler: Send + Sync {
    /// Check if another attempt should be made after `attempt` failed
    fn should_retry(&self, error: &FlowError, attempt: u32, retry_count: u32) -> bool;

    /// Backoff before attempt `attempt + 1`
    fn calculate_backoff(&self, attempt: u32) -> Duration;

    /// Classify the final failure under the active policy
    fn decide(&self, command: &str, error: &FlowError, policy: ErrorPolicy) -> FailureDecision;
}

/// Fixed backoff, element-not-found always skippable
pub struct DefaultFailureHandler {
    backoff: Duration,
}

impl DefaultFailureHandler {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }
}

impl Default for DefaultFailureHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn should_retry(&self, error: &FlowError, attempt: u32, retry_count: u32) -> bool {
        !error.is_terminal() && attempt <= retry_count
    }

    fn calculate_backoff(&self, _attempt: u32) -> Duration {
        self.backoff
    }

    fn decide(&self, command: &str, error: &FlowError, policy: ErrorPolicy) -> FailureDecision {
        if error.is_element_not_found() {
            warn!(command, "skipping missing element");
            return FailureDecision::SkipMissing;
        }
        let message = error.to_string();
        match policy {
            ErrorPolicy::Skip => {
                info!(command, error = %message, "[POLICY] skip");
                FailureDecision::Skip(message)
            }
            ErrorPolicy::Pause => {
                info!(command, error = %message, "[POLICY] pause");
                FailureDecision::Pause(message)
            }
            ErrorPolicy::Stop => {
                warn!(command, error = %message, "[POLICY] stop");
                FailureDecision::Stop(message)
            }
        }
    }
}
