//! Content-script presence per tab.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use sheetpilot_core_types::TabId;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::{BridgeConfig, BridgeError, TabBridge, TabCommand};

/// Tracks which tabs host a live content script.
///
/// Concurrent `ensure_injected` calls for one tab serialize on a per-tab lock,
/// so a second caller waits for the in-flight injection and then finds the
/// script alive instead of injecting twice.
pub struct InjectionTracker {
    config: BridgeConfig,
    locks: DashMap<TabId, Arc<Mutex<()>>>,
    injected: DashSet<TabId>,
}

impl InjectionTracker {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
            injected: DashSet::new(),
        }
    }

    /// Makes sure `tab` has a responsive executor, injecting one if the
    /// liveness probe fails.
    pub async fn ensure_injected<B>(&self, bridge: &B, tab: TabId) -> Result<(), BridgeError>
    where
        B: TabBridge + ?Sized,
    {
        let lock = self.locks.entry(tab).or_default().clone();
        let _guard = lock.lock().await;

        if self.probe(bridge, tab).await {
            self.injected.insert(tab);
            return Ok(());
        }
        self.injected.remove(&tab);
        if !bridge.tab_exists(tab).await {
            return Err(BridgeError::TabNotFound(tab));
        }

        info!(tab = %tab, "injecting content script");
        bridge.inject(tab).await?;
        sleep(self.config.injection_wait()).await;
        self.injected.insert(tab);
        Ok(())
    }

    async fn probe<B>(&self, bridge: &B, tab: TabId) -> bool
    where
        B: TabBridge + ?Sized,
    {
        match timeout(self.config.send_timeout(), bridge.send(tab, TabCommand::Ping)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(tab = %tab, "liveness probe failed: {}", err);
                false
            }
            Err(_) => {
                debug!(tab = %tab, "liveness probe timed out");
                false
            }
        }
    }

    pub fn is_injected(&self, tab: TabId) -> bool {
        self.injected.contains(&tab)
    }

    /// The tab started a fresh navigation; its script is gone.
    pub fn invalidate(&self, tab: TabId) {
        if self.injected.remove(&tab).is_some() {
            debug!(tab = %tab, "content script invalidated");
        }
    }

    /// The tab was closed.
    pub fn forget(&self, tab: TabId) {
        self.invalidate(tab);
        self.locks.remove(&tab);
    }
}
