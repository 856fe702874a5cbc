//! In-process tab
//!
//! [`LocalTab`] plays the part of a browser tab with an injectable content
//! script: the script is a [`RowExecutor`] over an [`InMemoryPage`], it dies
//! whenever the page starts loading a new document, and it talks back to the
//! coordinator through [`CoordinatorLink`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use action_flow::{
    CommandInterpreter, FlowError, HostLink, InterpreterTiming, MacroResolver, RowExecutor,
    RowJob, RunPolicy,
};
use action_primitives::{InMemoryPage, PageEvent};
use async_trait::async_trait;
use extensions_bridge::{
    BridgeError, ControlMessage, TabBridge, TabCommand, TabEvent, TabMessage,
};
use parking_lot::Mutex;
use sheetpilot_core_types::{CommandCursor, DispatchToken, TabId};
use sheetpilot_scheduler::{CoordinatorHandle, SchedulerError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn connectivity(err: SchedulerError) -> FlowError {
    FlowError::Connectivity(err.to_string())
}

/// Executor side of the coordinator protocol for one tab.
pub struct CoordinatorLink {
    handle: CoordinatorHandle,
    tab: TabId,
    resume: Arc<Notify>,
}

impl CoordinatorLink {
    pub fn new(handle: CoordinatorHandle, tab: TabId, resume: Arc<Notify>) -> Self {
        Self {
            handle,
            tab,
            resume,
        }
    }

    async fn notify(&self, message: TabMessage) {
        let action = message.action();
        if let Err(err) = self.handle.tab_message(self.tab, message).await {
            warn!("{} not delivered: {}", action, err);
        }
    }
}

#[async_trait]
impl HostLink for CoordinatorLink {
    async fn variables(&self) -> Result<BTreeMap<String, String>, FlowError> {
        self.handle.variables().await.map_err(connectivity)
    }

    async fn set_variable(&self, key: &str, value: &str) -> Result<bool, FlowError> {
        let response = self
            .handle
            .request(ControlMessage::SetVariable {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await
            .map_err(connectivity)?;
        if let Some(error) = &response.error {
            debug!(key, "SET_VARIABLE refused: {}", error);
        }
        Ok(response.success)
    }

    async fn will_navigate(
        &self,
        token: DispatchToken,
        cursor: CommandCursor,
    ) -> Result<(), FlowError> {
        self.handle
            .tab_message(self.tab, TabMessage::WillNavigate { token, cursor })
            .await
            .map_err(connectivity)
    }

    async fn wait_for_resume(
        &self,
        token: DispatchToken,
        row_index: u32,
    ) -> Result<(), FlowError> {
        self.handle
            .tab_message(self.tab, TabMessage::PauseTriggered { token, row_index })
            .await
            .map_err(connectivity)?;
        self.resume.notified().await;
        Ok(())
    }

    async fn report_command_error(
        &self,
        token: DispatchToken,
        command: &str,
        error: &str,
        row_index: u32,
    ) {
        self.notify(TabMessage::CommandError {
            token,
            command: command.to_string(),
            error: error.to_string(),
            row_index,
        })
        .await
    }

    async fn update_policy(&self, token: DispatchToken, policy: RunPolicy) {
        self.notify(TabMessage::PolicyChanged { token, policy }).await
    }
}

/// A live content script. Gone once the document unloads.
#[derive(Clone)]
struct Script {
    executor: Arc<RowExecutor>,
    cancel: CancellationToken,
    resume: Arc<Notify>,
    row: Arc<Mutex<Option<CancellationToken>>>,
}

impl Script {
    fn kill(&self) {
        self.cancel.cancel();
        self.resume.notify_waiters();
    }
}

pub struct LocalTab {
    id: TabId,
    page: Arc<InMemoryPage>,
    handle: CoordinatorHandle,
    macros: Arc<dyn MacroResolver>,
    timing: InterpreterTiming,
    script: Mutex<Option<Script>>,
    open: AtomicBool,
    shutdown: CancellationToken,
}

impl LocalTab {
    pub fn new(
        id: TabId,
        page: Arc<InMemoryPage>,
        handle: CoordinatorHandle,
        macros: Arc<dyn MacroResolver>,
        timing: InterpreterTiming,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            page,
            handle,
            macros,
            timing,
            script: Mutex::new(None),
            open: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn page(&self) -> &Arc<InMemoryPage> {
        &self.page
    }

    pub fn has_script(&self) -> bool {
        self.script.lock().is_some()
    }

    /// Forwards page lifecycle events to the coordinator, tearing the script
    /// down as soon as a new document starts loading.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = self.page.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                let forwarded = match event {
                    Ok(PageEvent::Loading { url }) => {
                        this.unload();
                        TabEvent::Loading { tab: this.id, url }
                    }
                    Ok(PageEvent::Complete { url }) => TabEvent::Complete { tab: this.id, url },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "page events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if this.handle.tab_event(forwarded).await.is_err() {
                    break;
                }
            }
            debug!(tab = %this.id, "page watcher stopped");
        })
    }

    /// Closes the tab: kills the script and reports the removal.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.unload();
        self.shutdown.cancel();
        let _ = self
            .handle
            .tab_event(TabEvent::Removed { tab: self.id })
            .await;
    }

    fn unload(&self) {
        if let Some(script) = self.script.lock().take() {
            debug!(tab = %self.id, "content script unloaded");
            script.kill();
        }
    }

    fn check_tab(&self, tab: TabId) -> Result<(), BridgeError> {
        if tab != self.id || !self.open.load(Ordering::SeqCst) {
            return Err(BridgeError::TabNotFound(tab));
        }
        Ok(())
    }

    fn start_row(&self, script: Script, job: RowJob) {
        let row_cancel = script.cancel.child_token();
        if let Some(previous) = script.row.lock().replace(row_cancel.clone()) {
            previous.cancel();
        }
        let handle = self.handle.clone();
        let tab = self.id;
        tokio::spawn(async move {
            let token = job.token;
            let message = match script.executor.run(&job, row_cancel).await {
                Ok(report) => {
                    info!(
                        row_index = job.item.row_index,
                        executed = report.executed,
                        skipped = report.skipped,
                        "Row {} finished",
                        job.item.label()
                    );
                    TabMessage::AutomationCompleted { token }
                }
                Err(FlowError::Cancelled) => {
                    debug!(token = %token, "row cancelled");
                    return;
                }
                Err(err) => TabMessage::AutomationFailed {
                    token,
                    error: err.to_string(),
                },
            };
            if let Err(err) = handle.tab_message(tab, message).await {
                warn!("row result not delivered: {}", err);
            }
        });
    }
}

#[async_trait]
impl TabBridge for LocalTab {
    async fn send(&self, tab: TabId, command: TabCommand) -> Result<(), BridgeError> {
        self.check_tab(tab)?;
        let Some(script) = self.script.lock().clone() else {
            return Err(BridgeError::NoReceiver(tab));
        };
        match command {
            TabCommand::Ping => {}
            TabCommand::FillSingleRow(job) => self.start_row(script, job),
            TabCommand::StopAutomation => {
                if let Some(row) = script.row.lock().take() {
                    row.cancel();
                }
                script.resume.notify_waiters();
            }
            TabCommand::Unpause => script.resume.notify_one(),
        }
        Ok(())
    }

    async fn inject(&self, tab: TabId) -> Result<(), BridgeError> {
        self.check_tab(tab)?;
        let resume = Arc::new(Notify::new());
        let link = Arc::new(CoordinatorLink::new(
            self.handle.clone(),
            self.id,
            resume.clone(),
        ));
        let interpreter = CommandInterpreter::new(self.page.clone(), link, self.macros.clone())
            .with_timing(self.timing.clone());
        let script = Script {
            executor: Arc::new(RowExecutor::new(Arc::new(interpreter))),
            cancel: CancellationToken::new(),
            resume,
            row: Arc::new(Mutex::new(None)),
        };
        if let Some(old) = self.script.lock().replace(script) {
            old.kill();
        }
        info!(tab = %self.id, "content script injected");
        Ok(())
    }

    async fn tab_exists(&self, tab: TabId) -> bool {
        self.check_tab(tab).is_ok()
    }
}
