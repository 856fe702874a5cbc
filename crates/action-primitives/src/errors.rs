//! Error types for action primitives

use thiserror::Error;

/// Failures reported by a DOM-action provider or the wait primitive
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Selector resolved to nothing
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Wait operation or deadline exceeded
    #[error("Wait timeout: {0}")]
    WaitTimeout(String),

    /// Operation was cancelled (stop requested or host torn down)
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Element exists but refused the interaction
    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    /// Navigation target rejected before leaving the page
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Host page went away mid-operation
    #[error("Page context lost: {0}")]
    ContextLost(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::ElementNotFound(_)
                | ActionError::WaitTimeout(_)
                | ActionError::NotInteractable(_)
        )
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ActionError::Interrupted(_) | ActionError::ContextLost(_))
    }
}
