//! Turning sheet rows into a run queue

use std::collections::BTreeSet;

use sheetpilot_core_types::{active_column_indices, index_to_column_letter, RowData, RowItem};
use thiserror::Error;

/// Column B names the item unless an identifier column is configured.
const DEFAULT_IDENTIFIER_COLUMN: usize = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid row range '{0}': use digits, commas and dashes (e.g. 3, 5-10)")]
    InvalidRange(String),
    #[error("no rows selected")]
    NoRows,
    #[error("sheet has no data")]
    NoData,
    #[error("none of the selected rows exist in the sheet")]
    EmptyQueue,
}

/// How a process maps sheet columns onto the queue
#[derive(Clone, Debug, Default)]
pub struct QueueSpec {
    /// Active column filter such as `A-C,F`; blank keeps every column
    pub active_columns: Option<String>,
    /// Column naming each item (`itemName`); for a range the first column wins
    pub identifier_column: Option<String>,
}

/// Parses `"3, 5-10"` into sorted, unique 1-based row numbers.
///
/// Reversed or half-empty ranges are skipped; any character other than
/// digits, commas, dashes and whitespace is an error.
pub fn parse_row_range(spec: &str) -> Result<Vec<u32>, QueueError> {
    if spec
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == ',' || c == '-' || c.is_whitespace()))
    {
        return Err(QueueError::InvalidRange(spec.to_string()));
    }
    let mut rows = BTreeSet::new();
    for part in spec.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    if start <= end {
                        rows.extend(start..=end);
                    }
                }
            }
            None => {
                if let Ok(row) = part.trim().parse::<u32>() {
                    rows.insert(row);
                }
            }
        }
    }
    Ok(rows.into_iter().collect())
}

/// Builds queue items for `selected` rows of `sheet`.
///
/// Row 1 holds the command headers. Selected rows that do not exist are
/// dropped; an empty result is an error.
pub fn build_queue(
    sheet: &[Vec<String>],
    selected: &[u32],
    spec: &QueueSpec,
) -> Result<Vec<RowItem>, QueueError> {
    if selected.is_empty() {
        return Err(QueueError::NoRows);
    }
    let header = sheet.first().ok_or(QueueError::NoData)?;
    let active = spec
        .active_columns
        .as_deref()
        .and_then(active_column_indices)
        .filter(|indices| !indices.is_empty());
    let identifier = spec
        .identifier_column
        .as_deref()
        .and_then(active_column_indices)
        .and_then(|indices| indices.first().copied())
        .unwrap_or(DEFAULT_IDENTIFIER_COLUMN);

    let mut queue = Vec::new();
    for &row_index in selected {
        let Some(row) = row_index
            .checked_sub(1)
            .and_then(|idx| sheet.get(idx as usize))
        else {
            continue;
        };
        let cell = |idx: usize| row.get(idx).cloned().unwrap_or_default();
        let columns: Vec<usize> = match &active {
            Some(indices) => indices
                .iter()
                .copied()
                .filter(|&idx| idx < header.len())
                .collect(),
            None => (0..header.len()).collect(),
        };
        let row_data: RowData = row
            .iter()
            .enumerate()
            .map(|(idx, value)| (index_to_column_letter(idx), value.clone()))
            .collect();

        queue.push(RowItem {
            row_index,
            item_name: row.get(identifier).cloned(),
            xpaths: columns.iter().map(|&idx| header[idx].clone()).collect(),
            values: columns.iter().map(|&idx| cell(idx)).collect(),
            row_data,
        });
    }

    if queue.is_empty() {
        return Err(QueueError::EmptyQueue);
    }
    Ok(queue)
}
