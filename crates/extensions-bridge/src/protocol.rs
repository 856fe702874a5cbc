//! Wire messages between the UI, the coordinator and the per-tab executor.
//!
//! Every message is a JSON object discriminated by its `action` field, using
//! the action names the content scripts speak.

use action_flow::{RowJob, RunPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheetpilot_core_types::{CommandCursor, DispatchToken, RowItem, TabId};

/// UI → coordinator control surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlMessage {
    #[serde(rename = "START_BATCH", rename_all = "camelCase")]
    StartBatch {
        queue: Vec<RowItem>,
        tab_id: TabId,
        #[serde(default)]
        profile_name: Option<String>,
        #[serde(default)]
        process_name: Option<String>,
    },
    #[serde(rename = "PAUSE_BATCH")]
    PauseBatch,
    #[serde(rename = "RESUME_BATCH")]
    ResumeBatch,
    #[serde(rename = "STOP_BATCH")]
    StopBatch,
    #[serde(rename = "GET_STATE", alias = "GET_STATUS")]
    GetState,
    #[serde(rename = "SET_VARIABLE")]
    SetVariable { key: String, value: String },
    #[serde(rename = "GET_VARIABLES")]
    GetVariables,
    #[serde(rename = "DELETE_VARIABLE")]
    DeleteVariable { key: String },
    #[serde(rename = "CLEAR_VARIABLES")]
    ClearVariables,
}

impl ControlMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::StartBatch { .. } => "START_BATCH",
            ControlMessage::PauseBatch => "PAUSE_BATCH",
            ControlMessage::ResumeBatch => "RESUME_BATCH",
            ControlMessage::StopBatch => "STOP_BATCH",
            ControlMessage::GetState => "GET_STATE",
            ControlMessage::SetVariable { .. } => "SET_VARIABLE",
            ControlMessage::GetVariables => "GET_VARIABLES",
            ControlMessage::DeleteVariable { .. } => "DELETE_VARIABLE",
            ControlMessage::ClearVariables => "CLEAR_VARIABLES",
        }
    }

    /// Messages whose effect must be durable before the reply goes out.
    pub fn changes_run_state(&self) -> bool {
        matches!(
            self,
            ControlMessage::StartBatch { .. }
                | ControlMessage::PauseBatch
                | ControlMessage::ResumeBatch
                | ControlMessage::StopBatch
        )
    }
}

/// Structured reply to every [`ControlMessage`]. Handlers never fail any
/// other way.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// Executor → coordinator notifications. Each carries the token of the
/// dispatch it belongs to; the coordinator drops stale ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TabMessage {
    #[serde(rename = "automation_completed")]
    AutomationCompleted { token: DispatchToken },
    #[serde(rename = "automation_failed")]
    AutomationFailed { token: DispatchToken, error: String },
    #[serde(rename = "PAUSE_TRIGGERED", rename_all = "camelCase")]
    PauseTriggered { token: DispatchToken, row_index: u32 },
    #[serde(rename = "WILL_NAVIGATE")]
    WillNavigate {
        token: DispatchToken,
        cursor: CommandCursor,
    },
    #[serde(rename = "COMMAND_ERROR", rename_all = "camelCase")]
    CommandError {
        token: DispatchToken,
        command: String,
        error: String,
        row_index: u32,
    },
    #[serde(rename = "POLICY_CHANGED")]
    PolicyChanged {
        token: DispatchToken,
        policy: RunPolicy,
    },
}

impl TabMessage {
    pub fn token(&self) -> DispatchToken {
        match self {
            TabMessage::AutomationCompleted { token }
            | TabMessage::AutomationFailed { token, .. }
            | TabMessage::PauseTriggered { token, .. }
            | TabMessage::WillNavigate { token, .. }
            | TabMessage::CommandError { token, .. }
            | TabMessage::PolicyChanged { token, .. } => *token,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            TabMessage::AutomationCompleted { .. } => "automation_completed",
            TabMessage::AutomationFailed { .. } => "automation_failed",
            TabMessage::PauseTriggered { .. } => "PAUSE_TRIGGERED",
            TabMessage::WillNavigate { .. } => "WILL_NAVIGATE",
            TabMessage::CommandError { .. } => "COMMAND_ERROR",
            TabMessage::PolicyChanged { .. } => "POLICY_CHANGED",
        }
    }
}

/// Coordinator → executor commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TabCommand {
    #[serde(rename = "fill_single_row")]
    FillSingleRow(RowJob),
    #[serde(rename = "stop_automation")]
    StopAutomation,
    /// Releases an in-script pause
    #[serde(rename = "UNPAUSE")]
    Unpause,
    /// Liveness probe of the content script
    #[serde(rename = "PING")]
    Ping,
}

impl TabCommand {
    pub fn action(&self) -> &'static str {
        match self {
            TabCommand::FillSingleRow(_) => "fill_single_row",
            TabCommand::StopAutomation => "stop_automation",
            TabCommand::Unpause => "UNPAUSE",
            TabCommand::Ping => "PING",
        }
    }
}

/// Browser-level tab lifecycle, observed by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TabEvent {
    /// The tab started loading a new document
    Loading { tab: TabId, url: String },
    /// The tab finished loading
    Complete { tab: TabId, url: String },
    Removed { tab: TabId },
}

impl TabEvent {
    pub fn tab(&self) -> TabId {
        match self {
            TabEvent::Loading { tab, .. }
            | TabEvent::Complete { tab, .. }
            | TabEvent::Removed { tab } => *tab,
        }
    }
}
