//! Core types for command execution

use std::sync::Arc;
use std::time::Duration;

use command_lang::{ConfigDirective, ErrorPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sheetpilot_core_types::{CommandCursor, DispatchToken, RowData, RowItem};
use tokio_util::sync::CancellationToken;

/// Run-scoped error policy and retry count, mutable through `config(...)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPolicy {
    pub on_error: ErrorPolicy,
    /// Extra attempts after the first failure
    pub retry_count: u32,
}

impl RunPolicy {
    /// Applies the keys present in a directive. Returns `true` if anything changed.
    pub fn apply(&mut self, directive: &ConfigDirective) -> bool {
        let before = *self;
        if let Some(policy) = directive.on_error {
            self.on_error = policy;
        }
        if let Some(retries) = directive.retry_count {
            self.retry_count = retries;
        }
        before != *self
    }
}

/// Shared handle so nested commands see `config(...)` updates immediately.
pub type SharedPolicy = Arc<Mutex<RunPolicy>>;

/// Interpreter timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterTiming {
    /// Budget of one leaf-command attempt
    pub command_timeout: Duration,
    /// Outer cap on one attempt of `url`, `checklogin`, `if` or `macro`,
    /// including any pause raised inside it
    pub composite_timeout: Duration,
    /// Pause between retry attempts
    pub retry_backoff: Duration,
    /// `waitfor` default when no timeout is given
    pub wait_for_timeout: Duration,
    /// `waiturl` default when no timeout is given
    pub wait_url_timeout: Duration,
    pub url_poll_interval: Duration,
    /// Sleep after issuing a navigation, expected to be cut short by unload
    pub navigation_grace: Duration,
    /// Between highlight and click
    pub click_delay: Duration,
    /// After a successful click
    pub click_settle: Duration,
    /// After a successful fill or conditional fill
    pub fill_settle: Duration,
    pub extract_timeout: Duration,
    /// Presence probe of `checklogin`
    pub login_check_timeout: Duration,
    /// Recursion limit for `if` / `macro` / `url` / `checklogin`
    pub max_nesting_depth: usize,
}

impl Default for InterpreterTiming {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            composite_timeout: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(1),
            wait_for_timeout: Duration::from_secs(10),
            wait_url_timeout: Duration::from_secs(15),
            url_poll_interval: Duration::from_millis(500),
            navigation_grace: Duration::from_secs(5),
            click_delay: Duration::from_millis(200),
            click_settle: Duration::from_millis(500),
            fill_settle: Duration::from_secs(1),
            extract_timeout: Duration::from_secs(3),
            login_check_timeout: Duration::from_secs(2),
            max_nesting_depth: 8,
        }
    }
}

/// One row dispatched to an executor (`fill_single_row`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowJob {
    pub token: DispatchToken,
    #[serde(flatten)]
    pub item: RowItem,
    pub sequence_number: u64,
    /// Skip every top-level command before this position
    #[serde(default)]
    pub resume_at: Option<CommandCursor>,
    #[serde(default)]
    pub policy: RunPolicy,
}

/// Per-command execution context
///
/// Cloned into nested commands; the policy, row data and cancellation token
/// are shared by every level.
#[derive(Clone, Debug)]
pub struct ExecContext {
    pub cell_value: String,
    pub row_index: u32,
    pub sequence_number: u64,
    pub row_data: Arc<RowData>,
    pub policy: SharedPolicy,
    pub cancel: CancellationToken,
    pub token: DispatchToken,
    /// Top-level command this context descends from
    pub cursor: CommandCursor,
    /// Nesting level, 0 for top-level commands
    pub depth: usize,
}

impl ExecContext {
    pub fn new(job: &RowJob, policy: SharedPolicy, cancel: CancellationToken) -> Self {
        Self {
            cell_value: String::new(),
            row_index: job.item.row_index,
            sequence_number: job.sequence_number,
            row_data: Arc::new(job.item.row_data.clone()),
            policy,
            cancel,
            token: job.token,
            cursor: CommandCursor::default(),
            depth: 0,
        }
    }

    /// Context of a top-level command at `cursor`
    pub fn at(&self, cursor: CommandCursor, cell_value: &str) -> Self {
        Self {
            cell_value: cell_value.to_string(),
            cursor,
            depth: 0,
            ..self.clone()
        }
    }

    /// Context of a sub-command run by a composite command
    pub fn nested(&self, cell_value: &str) -> Self {
        Self {
            cell_value: cell_value.to_string(),
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn policy(&self) -> RunPolicy {
        *self.policy.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cell value matches the literal "no" (click/delay opt-out)
    pub fn opted_out(&self) -> bool {
        self.cell_value.trim().eq_ignore_ascii_case("no")
    }
}

/// How a command settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    /// Failed but the failure was absorbed (missing element or `skip` policy)
    Skipped { reason: String },
    /// Failed under the `pause` policy and was resumed by the operator
    Resumed { reason: String },
}

/// Tally of a finished row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowReport {
    pub executed: usize,
    pub skipped: usize,
    /// Top-level commands bypassed because of `resume_at`
    pub resumed_past: usize,
}
