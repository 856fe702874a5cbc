use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use action_flow::RowJob;
use async_trait::async_trait;
use extensions_bridge::{
    BridgeError, ControlMessage, TabBridge, TabCommand, TabEvent, TabMessage,
};
use sheetpilot_core_types::{CommandCursor, DispatchToken, RowItem, TabId};
use sheetpilot_scheduler::{
    Coordinator, CoordinatorHandle, MemoryStorage, RunConfig, RunState, RunStatus, StateStorage,
    UiEvent, STATE_KEY, VARIABLES_KEY,
};
use variable_store::VariableLimits;

const TAB: TabId = TabId(7);

/// Tab whose script answers once injected. When `auto_complete` is on each
/// dispatched row reports completion right away.
struct FakeTab {
    handle: CoordinatorHandle,
    auto_complete: AtomicBool,
    exists: AtomicBool,
    injected: AtomicBool,
    unreachable: AtomicBool,
    injections: AtomicUsize,
    sent: Mutex<Vec<TabCommand>>,
}

impl FakeTab {
    fn new(handle: CoordinatorHandle, auto_complete: bool) -> Self {
        Self {
            handle,
            auto_complete: AtomicBool::new(auto_complete),
            exists: AtomicBool::new(true),
            injected: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            injections: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn jobs(&self) -> Vec<RowJob> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                TabCommand::FillSingleRow(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, action: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.action() == action)
            .count()
    }
}

#[async_trait]
impl TabBridge for FakeTab {
    async fn send(&self, tab: TabId, command: TabCommand) -> Result<(), BridgeError> {
        if !self.exists.load(Ordering::SeqCst) {
            return Err(BridgeError::TabNotFound(tab));
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::NoReceiver(tab));
        }
        if !self.injected.load(Ordering::SeqCst) {
            return Err(BridgeError::NoReceiver(tab));
        }
        if let TabCommand::FillSingleRow(job) = &command {
            if self.auto_complete.load(Ordering::SeqCst) {
                let handle = self.handle.clone();
                let token = job.token;
                tokio::spawn(async move {
                    let _ = handle
                        .tab_message(tab, TabMessage::AutomationCompleted { token })
                        .await;
                });
            }
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }

    async fn inject(&self, _tab: TabId) -> Result<(), BridgeError> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        self.injected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tab_exists(&self, _tab: TabId) -> bool {
        self.exists.load(Ordering::SeqCst)
    }
}

struct Harness {
    handle: CoordinatorHandle,
    tab: Arc<FakeTab>,
    storage: Arc<MemoryStorage>,
}

fn spawn_with(
    auto_complete: bool,
    storage: MemoryStorage,
    config: RunConfig,
    limits: VariableLimits,
) -> Harness {
    let (handle, mailbox) = CoordinatorHandle::channel(64);
    let tab = Arc::new(FakeTab::new(handle.clone(), auto_complete));
    let storage = Arc::new(storage);
    Coordinator::new(mailbox, tab.clone(), storage.clone())
        .with_run_config(config)
        .with_variable_limits(limits)
        .spawn();
    Harness {
        handle,
        tab,
        storage,
    }
}

fn spawn(auto_complete: bool) -> Harness {
    spawn_with(
        auto_complete,
        MemoryStorage::new(),
        RunConfig::default(),
        VariableLimits::default(),
    )
}

fn queue(rows: &[(u32, &str)]) -> Vec<RowItem> {
    rows.iter()
        .map(|(row, name)| RowItem {
            row_index: *row,
            item_name: Some(name.to_string()),
            xpaths: vec!["//input[@name='q']".to_string()],
            values: vec![name.to_string()],
            ..RowItem::default()
        })
        .collect()
}

async fn start(handle: &CoordinatorHandle, items: Vec<RowItem>) {
    let response = handle
        .control(ControlMessage::StartBatch {
            queue: items,
            tab_id: TAB,
            profile_name: Some("default".into()),
            process_name: None,
        })
        .await;
    assert!(response.success, "{:?}", response.error);
}

async fn wait_until(handle: &CoordinatorHandle, what: &str, check: impl Fn(&RunState) -> bool) -> RunState {
    for _ in 0..1_000 {
        let state = handle.state().await.unwrap();
        if check(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_jobs(tab: &FakeTab, n: usize) -> Vec<RowJob> {
    for _ in 0..1_000 {
        let jobs = tab.jobs();
        if jobs.len() >= n {
            return jobs;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {} dispatches, saw {}", n, tab.jobs().len());
}

#[tokio::test(start_paused = true)]
async fn processes_queue_in_order_and_finishes_idle() {
    let h = spawn(true);
    start(&h.handle, queue(&[(2, "alice"), (3, "bob"), (5, "carol")])).await;

    let state = wait_until(&h.handle, "idle", |s| s.status == RunStatus::Idle).await;
    assert_eq!(state.current_index, 3);
    assert!(state.logs.starts_with("Completed 3 items"), "{}", state.logs);

    let jobs = h.tab.jobs();
    let rows: Vec<u32> = jobs.iter().map(|j| j.item.row_index).collect();
    let seqs: Vec<u64> = jobs.iter().map(|j| j.sequence_number).collect();
    assert_eq!(rows, vec![2, 3, 5]);
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(h.tab.injections.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_completions_do_not_advance_the_run() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a"), (3, "b")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    h.handle
        .tab_message(
            TAB,
            TabMessage::AutomationCompleted {
                token: DispatchToken(token.0 + 40),
            },
        )
        .await
        .unwrap();
    h.handle
        .tab_message(TabId(99), TabMessage::AutomationCompleted { token })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.current_index, 0);

    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token })
        .await
        .unwrap();
    // a duplicate of the accepted completion is stale too
    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.current_index, 1);
    assert_eq!(state.status, RunStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn restarting_replaces_the_active_run() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a"), (3, "b")])).await;
    wait_for_jobs(&h.tab, 1).await;

    start(&h.handle, queue(&[(9, "z")])).await;
    let jobs = wait_for_jobs(&h.tab, 2).await;
    assert_eq!(jobs[1].item.row_index, 9);
    assert_ne!(jobs[0].token, jobs[1].token);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.tab.count("stop_automation"), 1);

    // the first run's executor is no longer listened to
    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token: jobs[0].token })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.total, 1);
    assert_eq!(state.current_index, 0);
}

#[tokio::test(start_paused = true)]
async fn announced_navigation_resumes_the_same_item() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a"), (3, "b")])).await;
    let first = wait_for_jobs(&h.tab, 1).await[0].clone();
    assert_eq!(first.resume_at, None);

    let cursor = CommandCursor::new(1, 0);
    h.handle
        .tab_message(
            TAB,
            TabMessage::WillNavigate {
                token: first.token,
                cursor,
            },
        )
        .await
        .unwrap();
    h.handle
        .tab_event(TabEvent::Loading {
            tab: TAB,
            url: "https://example.com/login".into(),
        })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert!(state.expecting_navigation);

    h.handle
        .tab_event(TabEvent::Complete {
            tab: TAB,
            url: "https://example.com/login".into(),
        })
        .await
        .unwrap();
    let jobs = wait_for_jobs(&h.tab, 2).await;
    let second = &jobs[1];
    assert_eq!(second.item.row_index, 2);
    assert_eq!(second.sequence_number, 1);
    assert_eq!(second.resume_at, Some(cursor));
    assert_ne!(second.token, first.token);

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.current_index, 0);
    assert_eq!(state.navigations, 1);
    assert!(!state.expecting_navigation);

    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token: second.token })
        .await
        .unwrap();
    let jobs = wait_for_jobs(&h.tab, 3).await;
    assert_eq!(jobs[2].item.row_index, 3);
    assert_eq!(jobs[2].resume_at, None);
}

#[tokio::test(start_paused = true)]
async fn unexpected_reload_pauses_the_run() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a")])).await;
    wait_for_jobs(&h.tab, 1).await;

    h.handle
        .tab_event(TabEvent::Loading {
            tab: TAB,
            url: "https://example.com/".into(),
        })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.logs.contains("reloaded unexpectedly"), "{}", state.logs);

    // resuming re-dispatches the interrupted item
    let response = h.handle.control(ControlMessage::ResumeBatch).await;
    assert!(response.success);
    let jobs = wait_for_jobs(&h.tab, 2).await;
    assert_eq!(jobs[1].item.row_index, 2);
}

#[tokio::test(start_paused = true)]
async fn navigation_watchdog_pauses_a_stuck_load() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    h.handle
        .tab_message(
            TAB,
            TabMessage::WillNavigate {
                token,
                cursor: CommandCursor::new(0, 0),
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.logs.contains("did not finish loading"), "{}", state.logs);
}

#[tokio::test(start_paused = true)]
async fn navigation_loop_is_capped() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a")])).await;

    for n in 1..=6u32 {
        let jobs = wait_for_jobs(&h.tab, n as usize).await;
        let token = jobs[n as usize - 1].token;
        h.handle
            .tab_message(
                TAB,
                TabMessage::WillNavigate {
                    token,
                    cursor: CommandCursor::new(0, 0),
                },
            )
            .await
            .unwrap();
        if n == 6 {
            break;
        }
        h.handle
            .tab_event(TabEvent::Loading {
                tab: TAB,
                url: "https://example.com/".into(),
            })
            .await
            .unwrap();
        h.handle
            .tab_event(TabEvent::Complete {
                tab: TAB,
                url: "https://example.com/".into(),
            })
            .await
            .unwrap();
    }

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.logs.contains("navigated 6 times"), "{}", state.logs);
}

#[tokio::test(start_paused = true)]
async fn sheet_pause_is_released_with_unpause() {
    let h = spawn(false);
    start(&h.handle, queue(&[(4, "a"), (5, "b")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    h.handle
        .tab_message(TAB, TabMessage::PauseTriggered { token, row_index: 4 })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.paused_by_sheet);

    assert!(h.handle.control(ControlMessage::ResumeBatch).await.success);
    assert_eq!(h.tab.count("UNPAUSE"), 1);
    // the live executor keeps the row; nothing is re-dispatched
    assert_eq!(h.tab.jobs().len(), 1);

    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token })
        .await
        .unwrap();
    let jobs = wait_for_jobs(&h.tab, 2).await;
    assert_eq!(jobs[1].item.row_index, 5);
}

#[tokio::test(start_paused = true)]
async fn operator_pause_holds_the_next_dispatch() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a"), (3, "b")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    assert!(h.handle.control(ControlMessage::PauseBatch).await.success);
    h.handle
        .tab_message(TAB, TabMessage::AutomationCompleted { token })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert_eq!(state.current_index, 1);
    assert_eq!(h.tab.jobs().len(), 1);

    assert!(h.handle.control(ControlMessage::ResumeBatch).await.success);
    let jobs = wait_for_jobs(&h.tab, 2).await;
    assert_eq!(jobs[1].item.row_index, 3);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_pauses_after_retries() {
    let h = spawn(false);
    h.tab.unreachable.store(true, Ordering::SeqCst);
    start(&h.handle, queue(&[(2, "a")])).await;

    let state = wait_until(&h.handle, "paused", |s| s.status == RunStatus::Paused).await;
    assert!(state.logs.contains("Lost connection"), "{}", state.logs);
    assert_eq!(state.current_index, 0);
    // one injection per dispatch attempt: the first plus two re-dispatches
    assert_eq!(h.tab.injections.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn closed_tab_pauses_and_refuses_resume() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a")])).await;
    wait_for_jobs(&h.tab, 1).await;

    h.tab.exists.store(false, Ordering::SeqCst);
    h.handle
        .tab_event(TabEvent::Removed { tab: TAB })
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);

    let response = h.handle.control(ControlMessage::ResumeBatch).await;
    assert!(!response.success);
    assert_eq!(h.handle.state().await.unwrap().status, RunStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn automation_failure_ends_the_run() {
    let h = spawn(false);
    start(&h.handle, queue(&[(2, "a"), (3, "b")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    h.handle
        .tab_message(
            TAB,
            TabMessage::AutomationFailed {
                token,
                error: "Command aborted: [STOP] Timeout".into(),
            },
        )
        .await
        .unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Idle);
    assert!(state.logs.contains("[STOP] Timeout"));
    assert_eq!(state.queue.len(), 2);

    let saved = h.storage.get(STATE_KEY).expect("state flushed");
    let saved: RunState = serde_json::from_slice(&saved).unwrap();
    assert_eq!(saved.status, RunStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn command_errors_reach_ui_subscribers() {
    let h = spawn(false);
    let mut events = h.handle.subscribe();
    start(&h.handle, queue(&[(2, "a")])).await;
    let token = wait_for_jobs(&h.tab, 1).await[0].token;

    h.handle
        .tab_message(
            TAB,
            TabMessage::CommandError {
                token,
                command: "click(//button)".into(),
                error: "[SKIPPED] Element not found".into(),
                row_index: 2,
            },
        )
        .await
        .unwrap();
    loop {
        match events.recv().await.unwrap() {
            UiEvent::CommandError { row_index, error, .. } => {
                assert_eq!(row_index, 2);
                assert_eq!(error, "[SKIPPED] Element not found");
                break;
            }
            UiEvent::UiUpdate { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn stop_resets_state_and_clears_a_crowded_store() {
    let limits = VariableLimits {
        max_vars: 200,
        ..VariableLimits::default()
    };
    let h = spawn_with(false, MemoryStorage::new(), RunConfig::default(), limits);
    for i in 0..101 {
        let response = h
            .handle
            .control(ControlMessage::SetVariable {
                key: format!("v{}", i),
                value: "x".into(),
            })
            .await;
        assert!(response.success);
    }
    start(&h.handle, queue(&[(2, "a")])).await;
    wait_for_jobs(&h.tab, 1).await;

    assert!(h.handle.control(ControlMessage::StopBatch).await.success);
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.logs, "Stopped");
    assert!(state.queue.is_empty());
    assert!(h.handle.variables().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.tab.count("stop_automation"), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_a_small_store() {
    let h = spawn(false);
    h.handle
        .control(ControlMessage::SetVariable {
            key: "total".into(),
            value: "42".into(),
        })
        .await;
    assert!(h.handle.control(ControlMessage::StopBatch).await.success);
    let vars = h.handle.variables().await.unwrap();
    assert_eq!(vars.get("total").map(String::as_str), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn variable_requests_follow_the_store_rules() {
    let limits = VariableLimits {
        max_vars: 2,
        ..VariableLimits::default()
    };
    let h = spawn_with(false, MemoryStorage::new(), RunConfig::default(), limits);
    let set = |key: &str| ControlMessage::SetVariable {
        key: key.into(),
        value: "1".into(),
    };
    assert!(h.handle.control(set("a")).await.success);
    assert!(h.handle.control(set("b")).await.success);
    let full = h.handle.control(set("c")).await;
    assert!(!full.success);
    assert!(full.error.unwrap().contains("full"));
    // updating an existing key is still allowed
    assert!(h.handle.control(set("a")).await.success);

    assert!(
        h.handle
            .control(ControlMessage::DeleteVariable { key: "nope".into() })
            .await
            .success
    );
    assert!(h.handle.control(ControlMessage::ClearVariables).await.success);
    assert!(h.handle.variables().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn variable_writes_are_debounced() {
    let h = spawn(false);
    for i in 0..5 {
        h.handle
            .control(ControlMessage::SetVariable {
                key: format!("k{}", i),
                value: i.to_string(),
            })
            .await;
    }
    assert_eq!(h.storage.writes(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.storage.writes(), 1);
    let saved = h.storage.get(VARIABLES_KEY).unwrap();
    let saved: serde_json::Value = serde_json::from_slice(&saved).unwrap();
    assert_eq!(saved["k4"]["value"], "4");
}

#[tokio::test(start_paused = true)]
async fn running_state_is_restored_as_paused() {
    let storage = MemoryStorage::new();
    let saved = RunState {
        status: RunStatus::Running,
        queue: queue(&[(2, "a"), (3, "b")]),
        total: 2,
        current_index: 1,
        target_tab_id: Some(TAB),
        paused_by_sheet: true,
        ..RunState::default()
    };
    storage
        .save(STATE_KEY, &serde_json::to_vec(&saved).unwrap())
        .await
        .unwrap();
    storage
        .save(
            VARIABLES_KEY,
            br#"{"total":{"value":"9","_timestamp":4102444800000}}"#,
        )
        .await
        .unwrap();

    let h = spawn_with(false, storage, RunConfig::default(), VariableLimits::default());
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert_eq!(state.current_index, 1);
    assert!(!state.paused_by_sheet);
    assert!(state.logs.starts_with("Restored"), "{}", state.logs);
    assert_eq!(
        h.handle.variables().await.unwrap().get("total").map(String::as_str),
        Some("9")
    );
    // nothing is dispatched until the operator resumes
    assert!(h.tab.jobs().is_empty());

    assert!(h.handle.control(ControlMessage::ResumeBatch).await.success);
    let jobs = wait_for_jobs(&h.tab, 1).await;
    assert_eq!(jobs[0].item.row_index, 3);
    assert_eq!(jobs[0].sequence_number, 2);
}

#[tokio::test(start_paused = true)]
async fn low_quota_warns_and_skips_variable_writes() {
    let config = RunConfig {
        storage_safety_margin_bytes: 1_990,
        ..RunConfig::default()
    };
    let h = spawn_with(
        false,
        MemoryStorage::with_quota(2_000),
        config,
        VariableLimits::default(),
    );
    let mut events = h.handle.subscribe();
    h.handle
        .control(ControlMessage::SetVariable {
            key: "k".into(),
            value: "v".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    match events.recv().await.unwrap() {
        UiEvent::QuotaLowWarning { quota, .. } => assert_eq!(quota, 2_000),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.storage.get(VARIABLES_KEY).is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_pending_writes() {
    let h = spawn(false);
    h.handle
        .control(ControlMessage::SetVariable {
            key: "k".into(),
            value: "v".into(),
        })
        .await;
    h.handle.shutdown().await.unwrap();
    assert!(h.storage.get(VARIABLES_KEY).is_some());
    assert!(h.handle.state().await.is_err());
}
