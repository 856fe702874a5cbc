//! Executor → coordinator channel
//!
//! The executor owns no state across a navigation. Everything it needs from
//! the run (variables, policy, pause handshakes) goes through [`HostLink`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sheetpilot_core_types::{CommandCursor, DispatchToken};
use tokio::sync::Notify;
use tracing::debug;

use crate::errors::FlowError;
use crate::types::RunPolicy;

#[async_trait]
pub trait HostLink: Send + Sync {
    /// Current global variables (`GET_VARIABLES`)
    async fn variables(&self) -> Result<BTreeMap<String, String>, FlowError>;

    /// Upsert a variable (`SET_VARIABLE`). `Ok(false)` when the store is full.
    async fn set_variable(&self, key: &str, value: &str) -> Result<bool, FlowError>;

    /// The page is about to unload because of the command at `cursor`
    /// (`WILL_NAVIGATE`).
    async fn will_navigate(
        &self,
        token: DispatchToken,
        cursor: CommandCursor,
    ) -> Result<(), FlowError>;

    /// Announces an in-script pause (`PAUSE_TRIGGERED`) and waits for `UNPAUSE`.
    async fn wait_for_resume(&self, token: DispatchToken, row_index: u32)
        -> Result<(), FlowError>;

    /// `COMMAND_ERROR`
    async fn report_command_error(
        &self,
        token: DispatchToken,
        command: &str,
        error: &str,
        row_index: u32,
    );

    /// `POLICY_CHANGED`
    async fn update_policy(&self, token: DispatchToken, policy: RunPolicy);
}

#[async_trait]
impl<H> HostLink for Arc<H>
where
    H: HostLink + ?Sized,
{
    async fn variables(&self) -> Result<BTreeMap<String, String>, FlowError> {
        (**self).variables().await
    }

    async fn set_variable(&self, key: &str, value: &str) -> Result<bool, FlowError> {
        (**self).set_variable(key, value).await
    }

    async fn will_navigate(
        &self,
        token: DispatchToken,
        cursor: CommandCursor,
    ) -> Result<(), FlowError> {
        (**self).will_navigate(token, cursor).await
    }

    async fn wait_for_resume(
        &self,
        token: DispatchToken,
        row_index: u32,
    ) -> Result<(), FlowError> {
        (**self).wait_for_resume(token, row_index).await
    }

    async fn report_command_error(
        &self,
        token: DispatchToken,
        command: &str,
        error: &str,
        row_index: u32,
    ) {
        (**self)
            .report_command_error(token, command, error, row_index)
            .await
    }

    async fn update_policy(&self, token: DispatchToken, policy: RunPolicy) {
        (**self).update_policy(token, policy).await
    }
}

/// What a [`RecordingHost`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    VariableSet { key: String, value: String },
    WillNavigate { cursor: CommandCursor },
    PauseTriggered { row_index: u32 },
    CommandError { command: String, error: String },
    PolicyChanged(RunPolicy),
}

/// Self-contained host for dry runs and tests: keeps variables in memory and
/// records every message. Pauses resolve immediately unless constructed with
/// [`RecordingHost::manual_resume`].
#[derive(Default)]
pub struct RecordingHost {
    variables: Mutex<BTreeMap<String, String>>,
    events: Mutex<Vec<HostEvent>>,
    manual_resume: bool,
    resume: Notify,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual_resume() -> Self {
        Self {
            manual_resume: true,
            ..Self::default()
        }
    }

    pub fn with_variable(self, key: &str, value: &str) -> Self {
        self.variables
            .lock()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Releases one pending `wait_for_resume`.
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    pub fn variable(&self, key: &str) -> Option<String> {
        self.variables.lock().get(key).cloned()
    }

    pub fn command_errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                HostEvent::CommandError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HostEvent) {
        debug!(?event, "host event");
        self.events.lock().push(event);
    }
}

#[async_trait]
impl HostLink for RecordingHost {
    async fn variables(&self) -> Result<BTreeMap<String, String>, FlowError> {
        Ok(self.variables.lock().clone())
    }

    async fn set_variable(&self, key: &str, value: &str) -> Result<bool, FlowError> {
        self.variables
            .lock()
            .insert(key.to_string(), value.to_string());
        self.record(HostEvent::VariableSet {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(true)
    }

    async fn will_navigate(
        &self,
        _token: DispatchToken,
        cursor: CommandCursor,
    ) -> Result<(), FlowError> {
        self.record(HostEvent::WillNavigate { cursor });
        Ok(())
    }

    async fn wait_for_resume(
        &self,
        _token: DispatchToken,
        row_index: u32,
    ) -> Result<(), FlowError> {
        self.record(HostEvent::PauseTriggered { row_index });
        if self.manual_resume {
            self.resume.notified().await;
        }
        Ok(())
    }

    async fn report_command_error(
        &self,
        _token: DispatchToken,
        command: &str,
        error: &str,
        _row_index: u32,
    ) {
        self.record(HostEvent::CommandError {
            command: command.to_string(),
            error: error.to_string(),
        });
    }

    async fn update_policy(&self, _token: DispatchToken, policy: RunPolicy) {
        self.record(HostEvent::PolicyChanged(policy));
    }
}
