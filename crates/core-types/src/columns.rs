//! Spreadsheet column letters and column-range lists.

use std::collections::BTreeSet;

use thiserror::Error;

/// Last addressable column (`ZZZ`), 0-based.
pub const MAX_COLUMN_INDEX: usize = 18_277;

/// Errors raised for malformed column specifications.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColumnRangeError {
    #[error("invalid column letter '{0}'")]
    InvalidColumn(String),

    #[error("reversed column range '{start}-{end}'")]
    Reversed { start: String, end: String },

    #[error("malformed column range '{0}'")]
    Malformed(String),

    #[error("column range '{0}' goes past column ZZZ")]
    TooLarge(String),
}

/// Converts a column letter to its 0-based index (`A` = 0, `Z` = 25, `AA` = 26).
///
/// Returns `None` for anything that is not a non-empty run of ASCII letters.
pub fn column_letter_to_index(letter: &str) -> Option<usize> {
    let letter = letter.trim();
    if letter.is_empty() || !letter.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut index: usize = 0;
    for c in letter.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Converts a 0-based index back to its column letter (`26` -> `AA`).
pub fn index_to_column_letter(index: usize) -> String {
    let mut num = index + 1;
    let mut letters = Vec::new();
    while num > 0 {
        let remainder = (num - 1) % 26;
        letters.push((b'A' + remainder as u8) as char);
        num = (num - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Expands a column list such as `{B,D-F,H}` into `["B","D","E","F","H"]`.
///
/// Braces are optional, order is preserved, letters are upper-cased. An empty
/// list yields an empty vector. Columns past `ZZZ`, or an expansion longer
/// than `MAX_COLUMN_INDEX + 1` entries, are rejected.
pub fn parse_column_range(spec: &str) -> Result<Vec<String>, ColumnRangeError> {
    let cleaned: String = spec.chars().filter(|c| *c != '{' && *c != '}').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let mut columns = Vec::new();
    for part in cleaned.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(ColumnRangeError::Malformed(spec.to_string()));
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start = start.trim();
                let end = end.trim();
                let start_idx = column_letter_to_index(start)
                    .ok_or_else(|| ColumnRangeError::InvalidColumn(start.to_string()))?;
                let end_idx = column_letter_to_index(end)
                    .ok_or_else(|| ColumnRangeError::InvalidColumn(end.to_string()))?;
                if start_idx > end_idx {
                    return Err(ColumnRangeError::Reversed {
                        start: start.to_uppercase(),
                        end: end.to_uppercase(),
                    });
                }
                if end_idx > MAX_COLUMN_INDEX
                    || columns.len() + (end_idx - start_idx) > MAX_COLUMN_INDEX
                {
                    return Err(ColumnRangeError::TooLarge(spec.to_string()));
                }
                columns.extend((start_idx..=end_idx).map(index_to_column_letter));
            }
            None => {
                match column_letter_to_index(part) {
                    None => return Err(ColumnRangeError::InvalidColumn(part.to_string())),
                    Some(idx) if idx > MAX_COLUMN_INDEX || columns.len() > MAX_COLUMN_INDEX => {
                        return Err(ColumnRangeError::TooLarge(spec.to_string()))
                    }
                    Some(_) => columns.push(part.to_uppercase()),
                }
            }
        }
    }
    Ok(columns)
}

/// Parses an "active columns" filter (`A-C,F`) into sorted, de-duplicated
/// 0-based indices. Blank input means "all columns" and yields `None`.
///
/// Unlike [`parse_column_range`] this is lenient: reversed ranges are
/// normalised, and unparseable parts or columns past `ZZZ` are skipped.
pub fn active_column_indices(spec: &str) -> Option<Vec<usize>> {
    if spec.trim().is_empty() {
        return None;
    }
    let mut indices = BTreeSet::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                if let (Some(s), Some(e)) = (column_letter_to_index(start), column_letter_to_index(end)) {
                    if s.max(e) <= MAX_COLUMN_INDEX {
                        indices.extend(s.min(e)..=s.max(e));
                    }
                }
            }
            None => {
                if let Some(idx) = column_letter_to_index(part).filter(|i| *i <= MAX_COLUMN_INDEX) {
                    indices.insert(idx);
                }
            }
        }
    }
    Some(indices.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_index_conversions() {
        assert_eq!(column_letter_to_index("A"), Some(0));
        assert_eq!(column_letter_to_index("z"), Some(25));
        assert_eq!(column_letter_to_index("AA"), Some(26));
        assert_eq!(column_letter_to_index("AZ"), Some(51));
        assert_eq!(column_letter_to_index(""), None);
        assert_eq!(column_letter_to_index("A1"), None);
        assert_eq!(index_to_column_letter(0), "A");
        assert_eq!(index_to_column_letter(26), "AA");
        assert_eq!(index_to_column_letter(701), "ZZ");
    }

    #[test]
    fn letters_round_trip_for_one_and_two_letter_columns() {
        for index in 0..(26 + 26 * 26) {
            let letter = index_to_column_letter(index);
            assert!(letter.len() <= 2);
            assert_eq!(column_letter_to_index(&letter), Some(index));
        }
    }

    #[test]
    fn range_expansion_keeps_order() {
        assert_eq!(
            parse_column_range("{B,D-F,H}").unwrap(),
            vec!["B", "D", "E", "F", "H"]
        );
        assert_eq!(parse_column_range("{ y - ab }").unwrap(), vec!["Y", "Z", "AA", "AB"]);
        assert!(parse_column_range("{}").unwrap().is_empty());
    }

    #[test]
    fn range_errors_are_reported() {
        assert!(matches!(
            parse_column_range("{F-D}"),
            Err(ColumnRangeError::Reversed { .. })
        ));
        assert!(matches!(
            parse_column_range("{B,,C}"),
            Err(ColumnRangeError::Malformed(_))
        ));
        assert!(matches!(
            parse_column_range("{B,1}"),
            Err(ColumnRangeError::InvalidColumn(_))
        ));
    }

    #[test]
    fn oversized_ranges_are_refused() {
        assert_eq!(column_letter_to_index("ZZZ"), Some(MAX_COLUMN_INDEX));
        assert_eq!(parse_column_range("{A-ZZZ}").unwrap().len(), MAX_COLUMN_INDEX + 1);
        for spec in ["{A-ZZZZ}", "{A-ZZZZZZZ}", "{AAAA}", "{A-ZZZ,B}", "{A-ZZZ,A-ZZZ}"] {
            assert_eq!(
                parse_column_range(spec),
                Err(ColumnRangeError::TooLarge(spec.to_string())),
                "{}",
                spec
            );
        }
        assert_eq!(active_column_indices("A-ZZZZZZZ,B"), Some(vec![1]));
    }

    #[test]
    fn active_columns_are_sorted_and_deduplicated() {
        assert_eq!(active_column_indices("  "), None);
        assert_eq!(active_column_indices("F, A-C, B"), Some(vec![0, 1, 2, 5]));
        assert_eq!(active_column_indices("C-A"), Some(vec![0, 1, 2]));
        assert_eq!(active_column_indices("?"), Some(vec![]));
    }
}
