//! Command execution error types

use action_primitives::ActionError;
use thiserror::Error;

/// Failures raised while executing commands
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Target selector resolved to nothing. Always skippable.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A wait or the per-command wrapper exceeded its budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed column range, macro, pattern or URL
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The coordinator could not be reached
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// The `stop` policy ended the run
    #[error("Run aborted: {0}")]
    Aborted(String),

    /// Stop was requested or the host page went away
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Extract into '{var}' failed: {reason}")]
    ExtractFailed { var: String, reason: String },

    /// Any other primitive failure
    #[error("Action failed: {0}")]
    Action(ActionError),
}

impl FlowError {
    pub fn is_element_not_found(&self) -> bool {
        matches!(self, FlowError::ElementNotFound(_))
    }

    /// Errors that skip the remaining retries
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowError::Aborted(_) | FlowError::Cancelled | FlowError::Configuration(_)
        )
    }

    /// Errors that end the row without consulting the error policy
    pub fn is_stop(&self) -> bool {
        matches!(self, FlowError::Aborted(_) | FlowError::Cancelled)
    }
}

impl From<ActionError> for FlowError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::ElementNotFound(msg) => FlowError::ElementNotFound(msg),
            ActionError::WaitTimeout(msg) => FlowError::Timeout(msg),
            ActionError::Interrupted(_) | ActionError::ContextLost(_) => FlowError::Cancelled,
            ActionError::InvalidUrl(msg) => FlowError::Configuration(msg),
            other => FlowError::Action(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(FlowError::ElementNotFound("//a".into()).is_element_not_found());
        assert!(FlowError::Configuration("bad".into()).is_terminal());
        assert!(!FlowError::Configuration("bad".into()).is_stop());
        assert!(FlowError::Cancelled.is_stop());
        assert!(!FlowError::Timeout("x".into()).is_terminal());
    }

    #[test]
    fn action_errors_map_onto_the_taxonomy() {
        assert_eq!(
            FlowError::from(ActionError::Interrupted("stop".into())),
            FlowError::Cancelled
        );
        assert!(matches!(
            FlowError::from(ActionError::WaitTimeout("slow".into())),
            FlowError::Timeout(_)
        ));
        assert!(matches!(
            FlowError::from(ActionError::NotInteractable("x".into())),
            FlowError::Action(_)
        ));
    }
}
