//! Broadcasts for UI observers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::RunState;

pub type UiEventBus = broadcast::Sender<UiEvent>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum UiEvent {
    /// The run state changed
    #[serde(rename = "UI_UPDATE")]
    UiUpdate { state: Box<RunState> },
    /// Durable storage is close to its cap
    #[serde(rename = "quota_low_warning", rename_all = "camelCase")]
    QuotaLowWarning { bytes_in_use: u64, quota: u64 },
    #[serde(rename = "COMMAND_ERROR", rename_all = "camelCase")]
    CommandError {
        command: String,
        error: String,
        row_index: u32,
    },
}
