//! Core data types for action primitives

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in for "never" when a timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating instead of overflowing the clock
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Execution context for one primitive call or command attempt
///
/// Carries the deadline and the run's cancellation token. Nested operations
/// derive a narrower context with [`ExecCtx::with_timeout`], never a wider one.
#[derive(Clone, Debug)]
pub struct ExecCtx {
    /// Deadline for this operation
    pub deadline: Instant,

    /// Cancellation token shared by the whole run
    pub cancel_token: CancellationToken,

    /// Unique identifier for log correlation
    pub action_id: String,
}

impl ExecCtx {
    pub fn new(timeout: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            deadline: deadline_after(timeout),
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Child context expiring after `timeout` or at the parent deadline,
    /// whichever comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = deadline_after(timeout).min(self.deadline);
        Self {
            deadline,
            cancel_token: self.cancel_token.clone(),
            action_id: self.action_id.clone(),
        }
    }

    /// Check if this context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Check if this context has exceeded its deadline
    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Get remaining time until deadline
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// How a target element is addressed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selector {
    XPath(String),
    Css(String),
}

impl Selector {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Selector::XPath(expr.into())
    }

    /// `input[name="..."]`
    pub fn input_name(name: &str) -> Self {
        Selector::Css(format!("input[name=\"{}\"]", name))
    }

    /// `#id`
    pub fn id(id: &str) -> Self {
        Selector::Css(format!("#{}", id))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Selector::XPath(s) | Selector::Css(s) => s,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::XPath(s) => write!(f, "xpath:{}", s),
            Selector::Css(s) => write!(f, "css:{}", s),
        }
    }
}

/// Opaque reference to a resolved element, valid until the page navigates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: u64,
    pub selector: Selector,
}

/// Page lifecycle notifications emitted by a DOM provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    /// Page started unloading towards `url`
    Loading { url: String },

    /// New document finished loading
    Complete { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn huge_timeouts_saturate() {
        let ctx = ExecCtx::new(Duration::MAX, CancellationToken::new());
        assert!(ctx.remaining_time() > Duration::from_secs(86_400 * 365));

        let child = ctx.with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(child.deadline, ctx.deadline);
        assert!(!child.is_timeout());
    }
}
