//! The run coordinator actor.
//!
//! Owns the [`RunState`], the variable store and every dispatch to the tab.
//! All transitions happen on one task, driven by the mailbox, by results of
//! its own spawned dispatches and by generation-stamped timers. A timer or a
//! dispatch result whose generation/token no longer matches is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{RowJob, RunPolicy};
use chrono::Utc;
use extensions_bridge::{
    send_with_retry, BridgeConfig, BridgeError, ControlMessage, ControlResponse, InjectionTracker,
    TabBridge, TabCommand, TabEvent, TabMessage,
};
use serde_json::json;
use sheetpilot_core_types::{CommandCursor, DispatchToken, RowItem, TabId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use variable_store::{VariableLimits, VariableStore};

use crate::api::{Envelope, Mailbox};
use crate::config::RunConfig;
use crate::events::{UiEvent, UiEventBus};
use crate::model::{RunState, RunStatus};
use crate::persist::Persistence;
use crate::storage::StateStorage;

/// `STOP_BATCH` wipes the variable store only when it holds more entries
/// than this.
pub const STOP_CLEAR_THRESHOLD: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TimerKind {
    NextItem,
    Redispatch,
    Persist,
    NavigationWatchdog,
    NavigationResume,
}

#[derive(Debug)]
enum Internal {
    Dispatched {
        token: DispatchToken,
        attempt: u32,
        result: Result<(), BridgeError>,
    },
    Timer {
        kind: TimerKind,
        generation: u64,
        attempt: u32,
    },
}

pub struct Coordinator {
    config: RunConfig,
    bridge_config: BridgeConfig,
    bridge: Arc<dyn TabBridge>,
    injection: Arc<InjectionTracker>,
    persistence: Persistence,
    events: UiEventBus,
    state: RunState,
    variables: VariableStore,
    /// Dispatch whose executor may still report back
    current_token: Option<DispatchToken>,
    last_token: DispatchToken,
    timers: HashMap<TimerKind, u64>,
    persist_pending: bool,
    state_dirty: bool,
    variables_dirty: bool,
    rx: Option<mpsc::Receiver<Envelope>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal>>,
}

impl Coordinator {
    pub fn new(
        mailbox: Mailbox,
        bridge: Arc<dyn TabBridge>,
        storage: Arc<dyn StateStorage>,
    ) -> Self {
        let config = RunConfig::default();
        let bridge_config = BridgeConfig::default();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            persistence: Persistence::new(storage, config.storage_safety_margin_bytes),
            injection: Arc::new(InjectionTracker::new(bridge_config.clone())),
            config,
            bridge_config,
            bridge,
            events: mailbox.events,
            state: RunState::default(),
            variables: VariableStore::new(VariableLimits::default()),
            current_token: None,
            last_token: DispatchToken::default(),
            timers: HashMap::new(),
            persist_pending: false,
            state_dirty: false,
            variables_dirty: false,
            rx: Some(mailbox.rx),
            internal_tx,
            internal_rx: Some(internal_rx),
        }
    }

    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        let storage = self.persistence.storage().clone();
        self.persistence = Persistence::new(storage, config.storage_safety_margin_bytes);
        self.config = config;
        self
    }

    pub fn with_bridge_config(mut self, config: BridgeConfig) -> Self {
        self.injection = Arc::new(InjectionTracker::new(config.clone()));
        self.bridge_config = config;
        self
    }

    pub fn with_variable_limits(mut self, limits: VariableLimits) -> Self {
        self.variables = VariableStore::new(limits);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let (Some(mut rx), Some(mut internal_rx)) = (self.rx.take(), self.internal_rx.take())
        else {
            return;
        };
        self.restore().await;

        let period = self
            .variables
            .limits()
            .sweep_interval
            .max(Duration::from_secs(1));
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(status = %self.state.status, "coordinator started");
        loop {
            tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => {
                        if !self.handle(envelope).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(internal) = internal_rx.recv() => self.handle_internal(internal).await,
                _ = sweep.tick() => self.sweep_variables(),
            }
        }
        self.flush().await;
        info!("coordinator stopped");
    }

    async fn restore(&mut self) {
        match self.persistence.load_state().await {
            Ok(Some(mut state)) => {
                // executors never survive a restart
                state.paused_by_sheet = false;
                state.expecting_navigation = false;
                if state.status == RunStatus::Running {
                    state.status = RunStatus::Paused;
                    state.logs = format!(
                        "Restored after restart at {}. Resume to continue.",
                        state.current_row_info()
                    );
                    self.state_dirty = true;
                }
                info!(status = %state.status, index = state.current_index, total = state.total, "run state restored");
                self.state = state;
            }
            Ok(None) => debug!("no saved run state"),
            Err(err) => warn!("Discarding unreadable run state: {}", err),
        }
        match self
            .persistence
            .load_variables(self.variables.limits())
            .await
        {
            Ok(Some(variables)) => {
                debug!(count = variables.len(), "variables restored");
                self.variables = variables;
            }
            Ok(None) => {}
            Err(err) => warn!("Discarding unreadable variables: {}", err),
        }
        if self.state_dirty {
            self.flush().await;
        }
    }

    /// Returns `false` once the actor should stop.
    async fn handle(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::Control { message, reply } => {
                let response = self.handle_control(message).await;
                let _ = reply.send(response);
            }
            Envelope::Tab { tab, message } => self.handle_tab_message(tab, message).await,
            Envelope::TabEvent(event) => self.handle_tab_event(event),
            Envelope::Shutdown { reply } => {
                self.flush().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_control(&mut self, message: ControlMessage) -> ControlResponse {
        debug!(action = message.action(), "control message");
        let flush = message.changes_run_state();
        let response = match message {
            ControlMessage::StartBatch {
                queue,
                tab_id,
                profile_name,
                process_name,
            } => self.start_batch(queue, tab_id, profile_name, process_name),
            ControlMessage::PauseBatch => self.pause_batch(),
            ControlMessage::ResumeBatch => self.resume_batch().await,
            ControlMessage::StopBatch => self.stop_batch(),
            ControlMessage::GetState => match serde_json::to_value(&self.state) {
                Ok(value) => ControlResponse::with_data(value),
                Err(err) => ControlResponse::failure(err.to_string()),
            },
            ControlMessage::SetVariable { key, value } => self.set_variable(&key, &value),
            ControlMessage::GetVariables => ControlResponse::with_data(json!(self.variables.all())),
            ControlMessage::DeleteVariable { key } => {
                if self.variables.delete(&key) {
                    self.mark_variables_dirty();
                }
                ControlResponse::ok()
            }
            ControlMessage::ClearVariables => {
                self.variables.clear();
                self.mark_variables_dirty();
                ControlResponse::ok()
            }
        };
        if flush {
            self.flush().await;
        }
        response
    }

    fn start_batch(
        &mut self,
        queue: Vec<RowItem>,
        tab: TabId,
        profile_name: Option<String>,
        process_name: Option<String>,
    ) -> ControlResponse {
        if queue.is_empty() {
            return ControlResponse::failure("Queue is empty, nothing to run");
        }
        if let Some(old_tab) = self.state.target_tab_id {
            if self.current_token.is_some() {
                self.stop_tab(old_tab);
            }
        }
        self.cancel_all_timers();
        self.current_token = None;

        let total = queue.len();
        self.state = RunState {
            status: RunStatus::Running,
            queue,
            total,
            target_tab_id: Some(tab),
            profile_name,
            process_name,
            logs: format!("Starting {} items", total),
            start_time: Some(Utc::now()),
            policy: RunPolicy::default(),
            ..RunState::default()
        };
        info!(tab = %tab, total, "batch started");
        self.run_next_item(0);
        self.state_changed();
        ControlResponse::ok()
    }

    fn pause_batch(&mut self) -> ControlResponse {
        match self.state.status {
            RunStatus::Running => {
                self.state.status = RunStatus::Paused;
                self.state.paused_by_sheet = false;
                self.state.logs = format!("Paused at {}", self.state.current_row_info());
                info!("batch paused by operator");
                self.state_changed();
                ControlResponse::ok()
            }
            RunStatus::Paused => ControlResponse::ok(),
            RunStatus::Idle => ControlResponse::failure("No active run to pause"),
        }
    }

    async fn resume_batch(&mut self) -> ControlResponse {
        match self.state.status {
            RunStatus::Running => return ControlResponse::ok(),
            RunStatus::Idle => return ControlResponse::failure("No paused run to resume"),
            RunStatus::Paused => {}
        }
        let Some(tab) = self.state.target_tab_id else {
            return ControlResponse::failure("Run has no target tab");
        };
        if !self.bridge.tab_exists(tab).await {
            self.state.logs = "Target tab no longer exists. Start the batch again.".to_string();
            self.state_changed();
            return ControlResponse::failure(self.state.logs.clone());
        }
        if let Err(err) = self.injection.ensure_injected(&*self.bridge, tab).await {
            self.state.logs = format!("Cannot reach the tab: {}", err);
            self.state_changed();
            return ControlResponse::failure(self.state.logs.clone());
        }

        self.state.status = RunStatus::Running;
        self.state.expecting_navigation = false;
        self.state.navigations = 0;
        self.state.logs = format!("Resuming {}", self.state.current_row_info());
        info!(tab = %tab, index = self.state.current_index, "batch resumed");

        if self.state.paused_by_sheet && self.current_token.is_some() {
            self.state.paused_by_sheet = false;
            if let Err(err) =
                send_with_retry(&*self.bridge, tab, TabCommand::Unpause, &self.bridge_config).await
            {
                self.current_token = None;
                self.pause(format!("Lost connection to the tab ({})", err));
                return ControlResponse::failure(self.state.logs.clone());
            }
        } else {
            self.state.paused_by_sheet = false;
            if self.current_token.is_none() {
                self.run_next_item(0);
            }
        }
        self.state_changed();
        ControlResponse::ok()
    }

    fn stop_batch(&mut self) -> ControlResponse {
        if let Some(tab) = self.state.target_tab_id {
            self.stop_tab(tab);
        }
        self.cancel_all_timers();
        self.current_token = None;
        if self.variables.len() > STOP_CLEAR_THRESHOLD {
            info!(count = self.variables.len(), "clearing variables on stop");
            self.variables.clear();
            self.mark_variables_dirty();
        }
        self.state = RunState::idle("Stopped");
        info!("batch stopped");
        self.state_changed();
        ControlResponse::ok()
    }

    fn set_variable(&mut self, key: &str, value: &str) -> ControlResponse {
        match self.variables.try_set(key, value) {
            Ok(outcome) => {
                if outcome.truncated {
                    warn!(key, "variable value truncated");
                }
                debug!(key, len = value.len(), "variable set");
                self.mark_variables_dirty();
                ControlResponse::ok()
            }
            Err(err) => {
                warn!("SET_VARIABLE refused: {}", err);
                ControlResponse::failure(err.to_string())
            }
        }
    }

    async fn handle_tab_message(&mut self, tab: TabId, message: TabMessage) {
        let token = message.token();
        if self.state.target_tab_id != Some(tab) || self.current_token != Some(token) {
            debug!(tab = %tab, token = %token, action = message.action(), "dropping stale tab message");
            return;
        }
        match message {
            TabMessage::AutomationCompleted { .. } => self.automation_completed(),
            TabMessage::AutomationFailed { error, .. } => {
                self.automation_failed(error);
                self.flush().await;
            }
            TabMessage::PauseTriggered { row_index, .. } => {
                self.state.status = RunStatus::Paused;
                self.state.paused_by_sheet = true;
                self.state.logs = format!("Paused by sheet at row {}. Resume to continue.", row_index);
                info!(row_index, "paused by sheet");
                self.state_changed();
            }
            TabMessage::WillNavigate { cursor, .. } => self.will_navigate(tab, cursor),
            TabMessage::CommandError {
                command,
                error,
                row_index,
                ..
            } => {
                self.state.logs = format!("Row {}: {}", row_index, error);
                let _ = self.events.send(UiEvent::CommandError {
                    command,
                    error,
                    row_index,
                });
                self.state_changed();
            }
            TabMessage::PolicyChanged { policy, .. } => {
                debug!(on_error = %policy.on_error, retry_count = policy.retry_count, "policy changed");
                self.state.policy = policy;
                self.mark_state_dirty();
            }
        }
    }

    fn automation_completed(&mut self) {
        self.current_token = None;
        let finished = self.state.current_row_info();
        self.state.advance();
        if self.state.is_finished() {
            self.finish_batch();
            return;
        }
        debug!("completed {}", finished);
        if self.state.status == RunStatus::Running {
            let delay = self.config.batch_item_delay();
            self.state.logs = format!(
                "Done {}. Next in {}",
                finished,
                humantime::format_duration(delay)
            );
            self.schedule(TimerKind::NextItem, delay, 0);
        } else {
            self.state.logs = format!("Done {}", finished);
        }
        self.state_changed();
    }

    fn finish_batch(&mut self) {
        let elapsed = self
            .state
            .start_time
            .and_then(|start| (Utc::now() - start).to_std().ok())
            .unwrap_or_default();
        let elapsed = Duration::from_secs(elapsed.as_secs());
        self.cancel_all_timers();
        self.state.status = RunStatus::Idle;
        self.state.logs = format!(
            "Completed {} items in {}",
            self.state.total,
            humantime::format_duration(elapsed)
        );
        info!(total = self.state.total, "batch finished");
        self.state_changed();
    }

    fn automation_failed(&mut self, error: String) {
        warn!("Row failed at {}: {}", self.state.current_row_info(), error);
        self.current_token = None;
        self.cancel_all_timers();
        self.state.status = RunStatus::Idle;
        self.state.expecting_navigation = false;
        self.state.paused_by_sheet = false;
        self.state.logs = format!("Stopped at {}: {}", self.state.current_row_info(), error);
        self.state_changed();
    }

    fn will_navigate(&mut self, tab: TabId, cursor: CommandCursor) {
        if self.state.status != RunStatus::Running {
            debug!("navigation announced while {}", self.state.status);
            return;
        }
        self.state.navigations += 1;
        self.state.resume_at = Some(cursor);
        if self.state.navigations > self.config.max_navigations_per_item {
            warn!(navigations = self.state.navigations, "navigation limit reached");
            self.current_token = None;
            self.stop_tab(tab);
            self.pause(format!(
                "{} navigated {} times without finishing. Paused to avoid a loop.",
                self.state.current_row_info(),
                self.state.navigations
            ));
            return;
        }
        debug!(cursor = %cursor, "expecting navigation");
        self.state.expecting_navigation = true;
        self.state.logs = format!("Navigating ({})", self.state.current_row_info());
        self.schedule(
            TimerKind::NavigationWatchdog,
            self.config.navigation_timeout(),
            0,
        );
        self.state_changed();
    }

    fn handle_tab_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Loading { tab, url } => {
                self.injection.invalidate(tab);
                if self.state.target_tab_id != Some(tab) {
                    return;
                }
                if self.current_token.take().is_some() {
                    debug!(url = %url, "executor context destroyed by navigation");
                    // nobody is left to unpause
                    self.state.paused_by_sheet = false;
                }
                if self.state.status != RunStatus::Running {
                    return;
                }
                if self.state.expecting_navigation {
                    // redirect chains keep the item waiting for the final load
                    self.cancel_timer(TimerKind::NavigationResume);
                    self.schedule(
                        TimerKind::NavigationWatchdog,
                        self.config.navigation_timeout(),
                        0,
                    );
                    self.state.logs = format!("Loading {}", url);
                    self.publish();
                } else {
                    warn!(url = %url, "unexpected page load while running");
                    self.pause(format!(
                        "Page reloaded unexpectedly at {}. Wait for it to load, then resume.",
                        self.state.current_row_info()
                    ));
                }
            }
            TabEvent::Complete { tab, url } => {
                if self.state.target_tab_id != Some(tab) {
                    return;
                }
                self.cancel_timer(TimerKind::NavigationWatchdog);
                if self.state.status == RunStatus::Running && self.state.expecting_navigation {
                    debug!(url = %url, "navigation finished");
                    self.state.logs = format!("Loaded {}, continuing", url);
                    self.schedule(
                        TimerKind::NavigationResume,
                        self.config.navigation_resume_delay(),
                        0,
                    );
                    self.publish();
                }
            }
            TabEvent::Removed { tab } => {
                self.injection.forget(tab);
                if self.state.target_tab_id != Some(tab) {
                    return;
                }
                self.current_token = None;
                self.state.expecting_navigation = false;
                self.state.paused_by_sheet = false;
                if self.state.status == RunStatus::Running {
                    self.pause("Target tab was closed. Reopen it and resume.");
                }
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Dispatched {
                token,
                attempt,
                result,
            } => {
                if self.current_token != Some(token) {
                    debug!(token = %token, "stale dispatch result");
                    return;
                }
                match result {
                    Ok(()) => debug!(token = %token, "row accepted by executor"),
                    Err(err) => self.dispatch_failed(err, attempt),
                }
            }
            Internal::Timer {
                kind,
                generation,
                attempt,
            } => {
                if self.timers.get(&kind).copied() != Some(generation) {
                    return;
                }
                match kind {
                    TimerKind::NextItem => self.run_next_item(0),
                    TimerKind::Redispatch => self.run_next_item(attempt),
                    TimerKind::Persist => self.flush().await,
                    TimerKind::NavigationWatchdog => self.navigation_timed_out(),
                    TimerKind::NavigationResume => {
                        if self.state.status == RunStatus::Running
                            && self.state.expecting_navigation
                        {
                            self.state.expecting_navigation = false;
                            self.run_next_item(0);
                        }
                    }
                }
            }
        }
    }

    /// Dispatches the current item to the target tab on a spawned task.
    fn run_next_item(&mut self, attempt: u32) {
        if self.state.status != RunStatus::Running {
            return;
        }
        let Some(tab) = self.state.target_tab_id else {
            self.pause("Run has no target tab");
            return;
        };
        let Some(item) = self.state.current_item().cloned() else {
            self.finish_batch();
            return;
        };

        self.last_token = self.last_token.next();
        let token = self.last_token;
        self.current_token = Some(token);
        let job = RowJob {
            token,
            item,
            sequence_number: self.state.current_index as u64 + 1,
            resume_at: self.state.resume_at,
            policy: self.state.policy,
        };
        let info = self.state.current_row_info();
        info!(token = %token, tab = %tab, attempt, resume_at = ?job.resume_at, "Dispatching {}", info);
        self.state.logs = format!("Processing {}", info);

        let bridge = self.bridge.clone();
        let injection = self.injection.clone();
        let config = self.bridge_config.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match injection.ensure_injected(&*bridge, tab).await {
                Ok(()) => {
                    send_with_retry(&*bridge, tab, TabCommand::FillSingleRow(job), &config).await
                }
                Err(err) => Err(err),
            };
            let _ = internal.send(Internal::Dispatched {
                token,
                attempt,
                result,
            });
        });
        self.state_changed();
    }

    fn dispatch_failed(&mut self, err: BridgeError, attempt: u32) {
        self.current_token = None;
        if let Some(tab) = self.state.target_tab_id {
            self.injection.invalidate(tab);
        }
        if err.is_connection() && attempt < self.config.connect_retries {
            warn!(
                "Retry {}/{} for connection error: {}",
                attempt + 1,
                self.config.connect_retries,
                err
            );
            self.schedule(
                TimerKind::Redispatch,
                self.config.reconnect_backoff(),
                attempt + 1,
            );
            return;
        }
        warn!("Dispatch failed: {}", err);
        let logs = match err {
            BridgeError::TabNotFound(_) => "Target tab was closed. Reopen it and resume.".to_string(),
            other => format!("Lost connection to the tab ({}). Reload the page and resume.", other),
        };
        self.pause(logs);
    }

    fn navigation_timed_out(&mut self) {
        if self.state.status != RunStatus::Running || !self.state.expecting_navigation {
            return;
        }
        warn!("expected navigation never completed");
        self.state.expecting_navigation = false;
        self.pause(format!(
            "Page did not finish loading within {}. Resume to retry.",
            humantime::format_duration(self.config.navigation_timeout())
        ));
    }

    fn pause(&mut self, logs: impl Into<String>) {
        self.state.status = RunStatus::Paused;
        self.state.logs = logs.into();
        self.state_changed();
    }

    fn stop_tab(&self, tab: TabId) {
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            if let Err(err) = bridge.send(tab, TabCommand::StopAutomation).await {
                debug!(tab = %tab, "stop_automation not delivered: {}", err);
            }
        });
    }

    fn sweep_variables(&mut self) {
        let report = self.variables.sweep();
        if !report.is_empty() {
            self.mark_variables_dirty();
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration, attempt: u32) {
        let generation = self.timers.entry(kind).or_insert(0);
        *generation += 1;
        let generation = *generation;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = internal.send(Internal::Timer {
                kind,
                generation,
                attempt,
            });
        });
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(generation) = self.timers.get_mut(&kind) {
            *generation += 1;
        }
    }

    fn cancel_all_timers(&mut self) {
        for kind in [
            TimerKind::NextItem,
            TimerKind::Redispatch,
            TimerKind::NavigationWatchdog,
            TimerKind::NavigationResume,
        ] {
            self.cancel_timer(kind);
        }
    }

    fn publish(&self) {
        let _ = self.events.send(UiEvent::UiUpdate {
            state: Box::new(self.state.clone()),
        });
    }

    fn state_changed(&mut self) {
        self.mark_state_dirty();
        self.publish();
    }

    fn mark_state_dirty(&mut self) {
        self.state_dirty = true;
        self.schedule_persist();
    }

    fn mark_variables_dirty(&mut self) {
        self.variables_dirty = true;
        self.schedule_persist();
    }

    fn schedule_persist(&mut self) {
        if !self.persist_pending {
            self.persist_pending = true;
            self.schedule(TimerKind::Persist, self.config.persist_debounce(), 0);
        }
    }

    /// Writes whatever is dirty right now and drops the pending debounce.
    async fn flush(&mut self) {
        self.persist_pending = false;
        self.cancel_timer(TimerKind::Persist);
        if !self.state_dirty && !self.variables_dirty {
            return;
        }

        let state = if self.state_dirty {
            match serde_json::to_vec(&self.state) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!("Failed to encode run state: {}", err);
                    None
                }
            }
        } else {
            None
        };
        let variables = if self.variables_dirty {
            match self.variables.to_json() {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!("Failed to encode variables: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let report = self
            .persistence
            .flush(state.as_deref(), variables.as_deref())
            .await;
        if report.state_written {
            self.state_dirty = false;
        }
        if report.variables_written {
            self.variables_dirty = false;
        }
        if let Some(low) = report.low_quota {
            let _ = self.events.send(UiEvent::QuotaLowWarning {
                bytes_in_use: low.bytes_in_use,
                quota: low.quota,
            });
        }
        for err in &report.errors {
            debug!("persistence error: {}", err);
        }
    }
}
