//! Column range slicing.
//!
//! A job's range spec selects a contiguous block of source columns using
//! spreadsheet letters (`"B:E"`). Parsing is deliberately lenient: anything
//! that does not parse selects the whole table instead of failing the job.

use std::ops::Range;

use crate::table::Table;

/// Spec values meaning "take every column" (compared case-insensitively).
pub const TAKE_ALL_SENTINELS: &[&str] = &["all", "*", "lấy hết", "nan", "none", "null"];

/// A parsed column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRange {
    /// Every column.
    All,
    /// Columns `start..=end` by zero-based index.
    Span {
        /// First column.
        start: usize,
        /// Last column (inclusive).
        end: usize,
    },
}

impl ColumnRange {
    /// Parses a range spec, falling back to [`ColumnRange::All`].
    ///
    /// Accepts `"B:E"`, a single column (`"C"` is `C:C`), or a take-all
    /// sentinel. Blank, reversed or malformed specs select everything.
    #[must_use]
    pub fn parse(spec: Option<&str>) -> Self {
        let Some(spec) = spec.map(str::trim) else {
            return Self::All;
        };
        if spec.is_empty() || TAKE_ALL_SENTINELS.contains(&spec.to_lowercase().as_str()) {
            return Self::All;
        }

        let (start, end) = match spec.split_once(':') {
            Some((start, end)) => (column_index(start.trim()), column_index(end.trim())),
            None => {
                let single = column_index(spec);
                (single, single)
            }
        };
        match (start, end) {
            (Some(start), Some(end)) if start <= end => Self::Span { start, end },
            _ => {
                tracing::debug!(spec, "unparsable range spec; taking all columns");
                Self::All
            }
        }
    }

    /// Resolves the range against a table of `width` columns.
    ///
    /// The end is clamped to the last column; a start beyond the table
    /// selects every column.
    #[must_use]
    pub fn resolve(self, width: usize) -> Range<usize> {
        match self {
            Self::Span { start, end } if start < width => start..(end + 1).min(width),
            _ => 0..width,
        }
    }

    /// Applies the range to a table.
    #[must_use]
    pub fn slice(self, table: &Table) -> Table {
        let cols = self.resolve(table.width());
        table.select_columns(cols.start, cols.end)
    }
}

/// Converts column letters to a zero-based index (`A` is 0, `AA` is 26).
///
/// Returns `None` for empty input, non-letters, or overflow.
#[must_use]
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut index: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = usize::from(c.to_ascii_uppercase() as u8 - b'A') + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Converts a zero-based column index to letters (0 is `A`, 26 is `AA`).
#[must_use]
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        // rem < 26 so the cast cannot truncate.
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(width: usize) -> Table {
        let headers = (0..width).map(column_letters).collect();
        let row = (0..width).map(|i| i.to_string()).collect();
        Table::new(headers, vec![row])
    }

    #[test]
    fn letters_map_base_26() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("ab"), Some(27));
        assert_eq!(column_index("ZZ"), Some(701));
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn letters_roundtrip() {
        for i in [0, 1, 25, 26, 51, 52, 701, 702, 18_277] {
            assert_eq!(column_index(&column_letters(i)), Some(i));
        }
    }

    #[test]
    fn b_to_d_on_six_columns() {
        let sliced = ColumnRange::parse(Some("B:D")).slice(&table(6));
        assert_eq!(sliced.headers(), ["B", "C", "D"]);
        assert_eq!(sliced.rows()[0], ["1", "2", "3"]);
    }

    #[test]
    fn end_is_clamped() {
        assert_eq!(ColumnRange::parse(Some("B:ZZ")).resolve(4), 1..4);
    }

    #[test]
    fn unparsable_specs_take_everything() {
        for spec in ["", "  ", "1:3", "B-D", "E:B", "B:", "Lấy hết", "ALL", "*", "nan"] {
            assert_eq!(ColumnRange::parse(Some(spec)).resolve(5), 0..5, "spec {spec:?}");
        }
        assert_eq!(ColumnRange::parse(None).resolve(5), 0..5);
    }

    #[test]
    fn start_beyond_width_takes_everything() {
        assert_eq!(ColumnRange::parse(Some("H:K")).resolve(3), 0..3);
    }

    #[test]
    fn single_column_and_case() {
        assert_eq!(ColumnRange::parse(Some("c")).resolve(6), 2..3);
        assert_eq!(ColumnRange::parse(Some(" b : d ")).resolve(6), 1..4);
    }
}
