//! Local batch runs: coordinator, in-process tab and page wired together

use std::collections::BTreeMap;
use std::sync::Arc;

use action_flow::MacroResolver;
use action_primitives::{InMemoryPage, PageFixture};
use anyhow::{bail, Result};
use extensions_bridge::ControlMessage;
use serde::Serialize;
use sheetpilot_core_types::{RowItem, TabId};
use sheetpilot_scheduler::{
    Coordinator, CoordinatorHandle, RunState, RunStatus, StateStorage, UiEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::host::LocalTab;

const LOCAL_TAB: TabId = TabId(1);
const MAILBOX_CAPACITY: usize = 64;

/// How a local run ended
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub logs: String,
    pub completed: usize,
    pub total: usize,
    pub command_errors: Vec<String>,
    /// Final value of every filled field, keyed by xpath
    pub filled: BTreeMap<String, String>,
    pub final_url: String,
    pub variables: BTreeMap<String, String>,
}

pub struct LocalRun {
    handle: CoordinatorHandle,
    tab: Arc<LocalTab>,
    coordinator: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl LocalRun {
    pub fn start(
        config: &AppConfig,
        fixture: PageFixture,
        macros: Arc<dyn MacroResolver>,
        storage: Arc<dyn StateStorage>,
    ) -> Self {
        let (handle, mailbox) = CoordinatorHandle::channel(MAILBOX_CAPACITY);
        let page = Arc::new(InMemoryPage::new(fixture));
        let tab = LocalTab::new(
            LOCAL_TAB,
            page,
            handle.clone(),
            macros,
            config.interpreter.timing(),
        );
        let watcher = tab.spawn_watcher();
        let coordinator = Coordinator::new(mailbox, tab.clone(), storage)
            .with_run_config(config.run.clone())
            .with_bridge_config(config.bridge.clone())
            .with_variable_limits(config.variables.limits())
            .spawn();
        Self {
            handle,
            tab,
            coordinator,
            watcher,
        }
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    pub fn tab(&self) -> &Arc<LocalTab> {
        &self.tab
    }

    /// Starts a batch over `queue` and waits until it leaves RUNNING.
    ///
    /// With `auto_resume` an in-sheet pause is resumed right away; any other
    /// pause ends the wait.
    pub async fn run_queue(&self, queue: Vec<RowItem>, auto_resume: bool) -> Result<RunOutcome> {
        let mut events = self.handle.subscribe();
        let response = self
            .handle
            .control(ControlMessage::StartBatch {
                queue,
                tab_id: self.tab.id(),
                profile_name: None,
                process_name: Some("local".to_string()),
            })
            .await;
        if !response.success {
            bail!(
                "START_BATCH refused: {}",
                response.error.unwrap_or_default()
            );
        }

        let mut command_errors = Vec::new();
        loop {
            let state = match events.recv().await {
                Ok(UiEvent::UiUpdate { state }) => *state,
                Ok(UiEvent::CommandError { error, row_index, .. }) => {
                    command_errors.push(format!("row {}: {}", row_index, error));
                    continue;
                }
                Ok(UiEvent::QuotaLowWarning {
                    bytes_in_use,
                    quota,
                }) => {
                    warn!(bytes_in_use, quota, "storage quota low");
                    continue;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed UI updates, polling state");
                    self.handle.state().await?
                }
                Err(RecvError::Closed) => bail!("coordinator stopped"),
            };
            match state.status {
                RunStatus::Running => {}
                RunStatus::Paused if auto_resume && state.paused_by_sheet => {
                    info!("resuming in-sheet pause");
                    let response = self.handle.control(ControlMessage::ResumeBatch).await;
                    if !response.success {
                        warn!("resume failed: {}", response.error.unwrap_or_default());
                        return self.outcome(state, command_errors).await;
                    }
                }
                RunStatus::Paused | RunStatus::Idle => {
                    return self.outcome(state, command_errors).await;
                }
            }
        }
    }

    async fn outcome(&self, state: RunState, command_errors: Vec<String>) -> Result<RunOutcome> {
        let page = self.tab.page();
        Ok(RunOutcome {
            status: state.status,
            logs: state.logs,
            completed: state.current_index,
            total: state.total,
            command_errors,
            filled: page.filled_values(),
            final_url: page.url(),
            variables: self.handle.variables().await?,
        })
    }

    /// Flushes the coordinator and stops the background tasks.
    pub async fn shutdown(self) -> Result<()> {
        self.tab.close().await;
        self.handle.shutdown().await?;
        let _ = self.coordinator.await;
        let _ = self.watcher.await;
        Ok(())
    }
}
