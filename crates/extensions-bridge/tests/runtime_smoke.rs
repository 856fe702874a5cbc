use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use extensions_bridge::{
    send_with_retry, BridgeConfig, BridgeError, InjectionTracker, TabBridge, TabCommand,
};
use sheetpilot_core_types::TabId;

/// Tab whose script answers only after injection; the first `drop_sends`
/// deliveries fail as if the script were not listening yet.
#[derive(Default)]
struct FakeTab {
    exists: AtomicBool,
    injected: AtomicBool,
    injections: AtomicUsize,
    sends: AtomicUsize,
    drop_sends: usize,
}

impl FakeTab {
    fn open() -> Self {
        Self {
            exists: AtomicBool::new(true),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TabBridge for FakeTab {
    async fn send(&self, tab: TabId, _command: TabCommand) -> Result<(), BridgeError> {
        if !self.exists.load(Ordering::SeqCst) {
            return Err(BridgeError::TabNotFound(tab));
        }
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        if !self.injected.load(Ordering::SeqCst) || n < self.drop_sends {
            return Err(BridgeError::NoReceiver(tab));
        }
        Ok(())
    }

    async fn inject(&self, _tab: TabId) -> Result<(), BridgeError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.injections.fetch_add(1, Ordering::SeqCst);
        self.injected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tab_exists(&self, _tab: TabId) -> bool {
        self.exists.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_injection() {
    let tab = Arc::new(FakeTab::open());
    let tracker = Arc::new(InjectionTracker::new(BridgeConfig::default()));

    let first = {
        let (tab, tracker) = (tab.clone(), tracker.clone());
        tokio::spawn(async move { tracker.ensure_injected(&*tab, TabId(1)).await })
    };
    let second = {
        let (tab, tracker) = (tab.clone(), tracker.clone());
        tokio::spawn(async move { tracker.ensure_injected(&*tab, TabId(1)).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(tab.injections.load(Ordering::SeqCst), 1);
    assert!(tracker.is_injected(TabId(1)));
}

#[tokio::test(start_paused = true)]
async fn invalidated_tab_is_reprobed_and_reinjected() {
    let tab = FakeTab::open();
    let tracker = InjectionTracker::new(BridgeConfig::default());
    tracker.ensure_injected(&tab, TabId(3)).await.unwrap();

    // navigation tears the script down
    tracker.invalidate(TabId(3));
    tab.injected.store(false, Ordering::SeqCst);
    assert!(!tracker.is_injected(TabId(3)));

    tracker.ensure_injected(&tab, TabId(3)).await.unwrap();
    assert_eq!(tab.injections.load(Ordering::SeqCst), 2);

    // still alive: the probe succeeds, no third injection
    tracker.ensure_injected(&tab, TabId(3)).await.unwrap();
    assert_eq!(tab.injections.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_tab_is_reported() {
    let tab = FakeTab::default();
    let tracker = InjectionTracker::new(BridgeConfig::default());
    assert_eq!(
        tracker.ensure_injected(&tab, TabId(9)).await,
        Err(BridgeError::TabNotFound(TabId(9)))
    );
    assert_eq!(
        send_with_retry(&tab, TabId(9), TabCommand::Ping, &BridgeConfig::default()).await,
        Err(BridgeError::TabNotFound(TabId(9)))
    );
    assert_eq!(tab.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn send_retries_with_exponential_backoff() {
    let tab = FakeTab {
        drop_sends: 2,
        ..FakeTab::open()
    };
    tab.injected.store(true, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    send_with_retry(&tab, TabId(2), TabCommand::Unpause, &BridgeConfig::default())
        .await
        .unwrap();

    assert_eq!(tab.sends.load(Ordering::SeqCst), 3);
    // 500ms + 1000ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn send_gives_up_after_the_configured_attempts() {
    let tab = FakeTab::open();
    let config = BridgeConfig {
        send_retries: 2,
        ..BridgeConfig::default()
    };
    let err = send_with_retry(&tab, TabId(2), TabCommand::StopAutomation, &config)
        .await
        .unwrap_err();
    assert!(err.is_connection());
    assert_eq!(tab.sends.load(Ordering::SeqCst), 2);
}
