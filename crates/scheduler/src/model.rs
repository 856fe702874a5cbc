use action_flow::RunPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetpilot_core_types::{CommandCursor, RowItem, TabId};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
        })
    }
}

/// Durable record of the active batch (`bgState`).
///
/// Variables are persisted separately so their churn never rewrites the
/// queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunState {
    pub status: RunStatus,
    pub queue: Vec<RowItem>,
    /// Index of the item being executed; equals `total` once done
    pub current_index: usize,
    pub total: usize,
    pub target_tab_id: Option<TabId>,
    pub profile_name: Option<String>,
    pub process_name: Option<String>,
    /// Last status line shown to the operator
    pub logs: String,
    pub start_time: Option<DateTime<Utc>>,
    /// The current item announced a navigation; its unload is not a failure
    pub expecting_navigation: bool,
    /// Paused by an in-script `pause`; resuming unpauses the live executor
    pub paused_by_sheet: bool,
    /// Where the current item continues after a navigation
    pub resume_at: Option<CommandCursor>,
    /// Navigations issued by the current item
    pub navigations: u32,
    pub policy: RunPolicy,
}

impl RunState {
    pub fn idle(logs: impl Into<String>) -> Self {
        Self {
            logs: logs.into(),
            ..Self::default()
        }
    }

    pub fn current_item(&self) -> Option<&RowItem> {
        self.queue.get(self.current_index)
    }

    pub fn is_finished(&self) -> bool {
        self.current_index >= self.total
    }

    /// `"Alice (row 4) [2/10]"` style description of the current item
    pub fn current_row_info(&self) -> String {
        match self.current_item() {
            Some(item) => format!(
                "{} [{}/{}]",
                item.label(),
                self.current_index + 1,
                self.total
            ),
            None => format!("[{}/{}]", self.current_index, self.total),
        }
    }

    /// Moves to the next item and clears the per-item bookkeeping.
    pub fn advance(&mut self) {
        self.current_index += 1;
        self.resume_at = None;
        self.navigations = 0;
        self.expecting_navigation = false;
        self.paused_by_sheet = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_the_extension_state() {
        let state = RunState {
            status: RunStatus::Running,
            queue: vec![RowItem {
                row_index: 3,
                ..RowItem::default()
            }],
            total: 1,
            target_tab_id: Some(TabId(12)),
            ..RunState::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "RUNNING");
        assert_eq!(value["currentIndex"], 0);
        assert_eq!(value["targetTabId"], 12);
        assert_eq!(value["expectingNavigation"], false);

        // older blobs without the newer fields still load
        let restored: RunState =
            serde_json::from_str(r#"{"status":"PAUSED","total":2,"currentIndex":1}"#).unwrap();
        assert_eq!(restored.status, RunStatus::Paused);
        assert!(restored.queue.is_empty());
    }

    #[test]
    fn advance_resets_item_bookkeeping() {
        let mut state = RunState {
            total: 2,
            resume_at: Some(CommandCursor::new(1, 0)),
            navigations: 2,
            expecting_navigation: true,
            paused_by_sheet: true,
            ..RunState::default()
        };
        state.advance();
        assert_eq!(state.current_index, 1);
        assert_eq!(state.resume_at, None);
        assert_eq!(state.navigations, 0);
        assert!(!state.expecting_navigation && !state.paused_by_sheet);
        assert!(!state.is_finished());
        state.advance();
        assert!(state.is_finished());
    }
}
