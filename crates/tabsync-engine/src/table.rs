//! In-memory string table.
//!
//! Spreadsheet grids are untyped text, so the engine keeps every cell as a
//! `String`. Rows are always exactly as wide as the header.

use serde::{Deserialize, Serialize};

/// A rectangular table of text cells with a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates a table, padding or truncating each row to the header width.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Builds a table from a raw grid whose first row is the header.
    ///
    /// Ragged grids are widened to their widest row; missing header cells
    /// become empty names.
    #[must_use]
    pub fn from_grid(mut grid: Vec<Vec<String>>) -> Self {
        if grid.is_empty() {
            return Self::default();
        }
        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let mut headers = grid.remove(0);
        headers.resize(width, String::new());
        Self::new(headers, grid)
    }

    /// Builds a headerless table from raw rows, naming columns by letter.
    #[must_use]
    pub fn from_rows_lettered(rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let headers = (0..width).map(crate::range::column_letters).collect();
        Self::new(headers, rows)
    }

    /// Column names.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Body rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Number of body rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no body rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column with exactly this name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Iterates over the cells of one column.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[index].as_str())
    }

    /// Replaces the header names, keeping width.
    pub(crate) fn rename_columns(&mut self, names: impl IntoIterator<Item = String>) {
        for (slot, name) in self.headers.iter_mut().zip(names) {
            *slot = name;
        }
    }

    /// Keeps the first `width` columns.
    pub(crate) fn truncate_columns(&mut self, width: usize) {
        self.headers.truncate(width);
        for row in &mut self.rows {
            row.truncate(width);
        }
    }

    /// Keeps the columns in `start..end`.
    #[must_use]
    pub fn select_columns(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.width());
        let start = start.min(end);
        Self {
            headers: self.headers[start..end].to_vec(),
            rows: self.rows.iter().map(|r| r[start..end].to_vec()).collect(),
        }
    }

    /// Keeps the rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[String]) -> bool) {
        self.rows.retain(|row| keep(row));
    }

    /// Inserts a row at the top of the body.
    pub(crate) fn prepend_row(&mut self, mut row: Vec<String>) {
        row.resize(self.width(), String::new());
        self.rows.insert(0, row);
    }

    /// Sets a column to the same value in every row, appending it if absent.
    pub fn set_constant_column(&mut self, name: &str, value: &str) {
        if let Some(index) = self.column_index(name) {
            for row in &mut self.rows {
                row[index] = value.to_string();
            }
            return;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.to_string());
        }
    }

    /// Applies `f` to every body cell.
    pub fn map_cells(&mut self, mut f: impl FnMut(&mut String)) {
        for cell in self.rows.iter_mut().flatten() {
            f(cell);
        }
    }

    /// Concatenates tables vertically over the union of their columns.
    ///
    /// Columns keep first-seen order; cells missing from a table are empty.
    #[must_use]
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a Table>) -> Self {
        let tables: Vec<&Table> = tables.into_iter().collect();
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for name in &table.headers {
                if !headers.contains(name) {
                    headers.push(name.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(|t| t.len()).sum());
        for table in tables {
            let positions: Vec<Option<usize>> =
                headers.iter().map(|h| table.column_index(h)).collect();
            for row in &table.rows {
                rows.push(
                    positions
                        .iter()
                        .map(|p| p.map_or_else(String::new, |i| row[i].clone()))
                        .collect(),
                );
            }
        }
        Self { headers, rows }
    }
}
