//! SheetPilot extensions bridge.
//!
//! Carries messages between the coordinator and the content-script executor
//! living in a browser tab. The tab side is reached through [`TabBridge`];
//! this crate adds the per-tab injection lock with its liveness probe and the
//! bounded send-with-retry used for every dispatch.

pub mod config;
pub mod injection;
pub mod protocol;
pub mod retry;

use async_trait::async_trait;
use sheetpilot_core_types::TabId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use config::BridgeConfig;
pub use injection::InjectionTracker;
pub use protocol::{ControlMessage, ControlResponse, TabCommand, TabEvent, TabMessage};
pub use retry::send_with_retry;

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("tab {0} does not exist")]
    TabNotFound(TabId),
    /// Nothing is listening in the tab (script not injected or torn down)
    #[error("could not establish connection: receiving end does not exist in {0}")]
    NoReceiver(TabId),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("channel closed")]
    ChannelClosed,
    #[error("script injection failed: {0}")]
    InjectionFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Transient failures worth a re-injection and another attempt
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BridgeError::NoReceiver(_) | BridgeError::ChannelClosed | BridgeError::Timeout(_)
        )
    }
}

/// Transport to the content scripts of browser tabs.
#[async_trait]
pub trait TabBridge: Send + Sync {
    /// Delivers `command` to the executor in `tab`. Resolves once the
    /// executor accepted it, not when the work is done.
    async fn send(&self, tab: TabId, command: TabCommand) -> Result<(), BridgeError>;

    /// Loads the content script into `tab`.
    async fn inject(&self, tab: TabId) -> Result<(), BridgeError>;

    async fn tab_exists(&self, tab: TabId) -> bool;
}

#[async_trait]
impl<B> TabBridge for Arc<B>
where
    B: TabBridge + ?Sized,
{
    async fn send(&self, tab: TabId, command: TabCommand) -> Result<(), BridgeError> {
        (**self).send(tab, command).await
    }

    async fn inject(&self, tab: TabId) -> Result<(), BridgeError> {
        (**self).inject(tab).await
    }

    async fn tab_exists(&self, tab: TabId) -> bool {
        (**self).tab_exists(tab).await
    }
}
