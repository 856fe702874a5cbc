use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod columns;

pub use columns::{
    active_column_indices, column_letter_to_index, index_to_column_letter, parse_column_range,
    ColumnRangeError, MAX_COLUMN_INDEX,
};

/// Browser tab identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// Identifies one dispatch of a row to an executor. Monotonic per coordinator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchToken(pub u64);

impl DispatchToken {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch#{}", self.0)
    }
}

/// Full spreadsheet row keyed by column letter (`A`, `B`, ... `AA`).
pub type RowData = BTreeMap<String, String>;

/// One spreadsheet data row queued for execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowItem {
    /// 1-based spreadsheet row.
    pub row_index: u32,
    #[serde(default)]
    pub item_name: Option<String>,
    /// Header cells, one command string per target column.
    pub xpaths: Vec<String>,
    /// Data cells parallel to `xpaths`.
    pub values: Vec<String>,
    #[serde(default)]
    pub row_data: RowData,
}

impl RowItem {
    /// Display label used in status lines.
    pub fn label(&self) -> String {
        match self.item_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{} (row {})", name, self.row_index),
            _ => format!("row {}", self.row_index),
        }
    }
}

/// Position of a top-level command inside a row: header cell index and the
/// index of the `&&`-separated part within that cell.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CommandCursor {
    pub cell: usize,
    pub part: usize,
}

impl CommandCursor {
    pub fn new(cell: usize, part: usize) -> Self {
        Self { cell, part }
    }
}

impl fmt::Display for CommandCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {} part {}", self.cell, self.part)
    }
}
