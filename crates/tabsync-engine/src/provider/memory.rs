//! In-memory spreadsheet provider.
//!
//! Holds workbooks in process, records every call for assertions, and can
//! inject failures per operation. Workbooks can be loaded from and saved to a
//! JSON snapshot, which is how the CLI runs without a spreadsheet service.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabsync_core::DocumentId;

use super::{ProviderError, ProviderErrorKind, ProviderResult, RowSpan, SpreadsheetProvider};

/// One worksheet: a title and its rows (row 1 first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worksheet {
    /// Worksheet title.
    pub title: String,
    /// Cell values, row-major.
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

/// A document: worksheets in tab order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    /// Worksheets in tab order; the first is the default sheet.
    #[serde(default)]
    pub sheets: Vec<Worksheet>,
}

impl Workbook {
    fn sheet(&self, title: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.title == title)
    }

    fn sheet_mut(&mut self, title: &str) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.title == title)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    documents: BTreeMap<String, Workbook>,
}

/// Kind of provider operation, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `worksheet_titles`
    ListSheets,
    /// `add_worksheet`
    AddSheet,
    /// `read_all`
    ReadAll,
    /// `read_row`
    ReadRow,
    /// `update_row`
    UpdateRow,
    /// `delete_rows`
    DeleteRows,
    /// `append_rows`
    AppendRows,
}

/// Record of a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp {
    /// Worksheet listing.
    ListSheets {
        /// Document.
        doc: String,
    },
    /// Worksheet creation.
    AddSheet {
        /// Document.
        doc: String,
        /// New title.
        title: String,
    },
    /// Full read.
    ReadAll {
        /// Document.
        doc: String,
        /// Worksheet.
        sheet: String,
    },
    /// Single row read.
    ReadRow {
        /// Document.
        doc: String,
        /// Worksheet.
        sheet: String,
        /// Row number.
        row: usize,
    },
    /// Row update.
    UpdateRow {
        /// Document.
        doc: String,
        /// Worksheet.
        sheet: String,
        /// Row number.
        row: usize,
    },
    /// Batched row deletion.
    DeleteRows {
        /// Document.
        doc: String,
        /// Worksheet.
        sheet: String,
        /// Spans in request order.
        spans: Vec<RowSpan>,
    },
    /// Row append.
    AppendRows {
        /// Document.
        doc: String,
        /// Worksheet.
        sheet: String,
        /// Rows appended.
        count: usize,
    },
}

/// An injected failure.
#[derive(Debug, Clone)]
pub struct Fault {
    /// Operation that fails.
    pub op: OpKind,
    /// Restrict to one document (`None` matches any).
    pub doc: Option<String>,
    /// Error kind returned.
    pub kind: ProviderErrorKind,
    /// Number of matching calls that fail before the fault clears.
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct State {
    workbooks: BTreeMap<String, Workbook>,
    operations: Vec<ProviderOp>,
    faults: Vec<Fault>,
    denied: HashSet<String>,
}

/// In-memory [`SpreadsheetProvider`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
}

impl MemoryProvider {
    /// Creates a provider with no documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads documents from a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_snapshot(path: &Path) -> tabsync_core::Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            tabsync_core::Error::storage_with_source(format!("read {}", path.display()), e)
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let provider = Self::new();
        provider.state().workbooks = snapshot.documents;
        Ok(provider)
    }

    /// Writes every document to a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    pub fn save_snapshot(&self, path: &Path) -> tabsync_core::Result<()> {
        let snapshot = Snapshot {
            documents: self.state().workbooks.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(path, bytes).map_err(|e| {
            tabsync_core::Error::storage_with_source(format!("write {}", path.display()), e)
        })
    }

    /// Creates or replaces a worksheet with the given rows.
    pub fn insert_sheet(&self, doc: &DocumentId, title: &str, rows: Vec<Vec<String>>) {
        let mut state = self.state();
        let book = state.workbooks.entry(doc.as_str().to_string()).or_default();
        if let Some(sheet) = book.sheet_mut(title) {
            sheet.rows = rows;
        } else {
            book.sheets.push(Worksheet {
                title: title.to_string(),
                rows,
            });
        }
    }

    /// Returns a worksheet's rows.
    #[must_use]
    pub fn sheet_rows(&self, doc: &DocumentId, title: &str) -> Option<Vec<Vec<String>>> {
        self.state()
            .workbooks
            .get(doc.as_str())
            .and_then(|book| book.sheet(title))
            .map(|sheet| sheet.rows.clone())
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<ProviderOp> {
        self.state().operations.clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }

    /// Fails the next `times` calls of `op` (on `doc`, if given) with `kind`.
    pub fn inject_fault(
        &self,
        op: OpKind,
        doc: Option<&DocumentId>,
        kind: ProviderErrorKind,
        times: usize,
    ) {
        self.state().faults.push(Fault {
            op,
            doc: doc.map(|d| d.as_str().to_string()),
            kind,
            remaining: times,
        });
    }

    /// Denies every call on `doc`.
    pub fn deny_access(&self, doc: &DocumentId) {
        self.state().denied.insert(doc.as_str().to_string());
    }

    /// Records `op` and returns the guarded state, or an injected failure.
    fn begin(&self, kind: OpKind, doc: &DocumentId, op: ProviderOp) -> ProviderResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.operations.push(op);

        if state.denied.contains(doc.as_str()) {
            return Err(ProviderError::new(
                ProviderErrorKind::PermissionDenied,
                format!("caller does not have access to {doc}"),
            ));
        }

        let hit = state.faults.iter_mut().find(|f| {
            f.op == kind && f.remaining > 0 && f.doc.as_deref().is_none_or(|d| d == doc.as_str())
        });
        if let Some(fault) = hit {
            fault.remaining -= 1;
            let kind = fault.kind;
            state.faults.retain(|f| f.remaining > 0);
            return Err(ProviderError::new(kind, format!("injected {kind} failure")));
        }
        Ok(state)
    }
}

fn workbook<'a>(state: &'a mut State, doc: &DocumentId) -> ProviderResult<&'a mut Workbook> {
    state
        .workbooks
        .get_mut(doc.as_str())
        .ok_or_else(|| ProviderError::not_found(format!("document {doc} not found")))
}

fn worksheet<'a>(
    state: &'a mut State,
    doc: &DocumentId,
    sheet: &str,
) -> ProviderResult<&'a mut Worksheet> {
    workbook(state, doc)?
        .sheet_mut(sheet)
        .ok_or_else(|| ProviderError::not_found(format!("worksheet '{sheet}' not found in {doc}")))
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(String::is_empty)
}

/// Number of rows up to and including the last non-blank one.
fn used_rows(rows: &[Vec<String>]) -> usize {
    rows.iter().rposition(|r| !is_blank(r)).map_or(0, |i| i + 1)
}

#[async_trait]
impl SpreadsheetProvider for MemoryProvider {
    async fn worksheet_titles(&self, doc: &DocumentId) -> ProviderResult<Vec<String>> {
        let mut state = self.begin(
            OpKind::ListSheets,
            doc,
            ProviderOp::ListSheets {
                doc: doc.to_string(),
            },
        )?;
        Ok(workbook(&mut state, doc)?
            .sheets
            .iter()
            .map(|s| s.title.clone())
            .collect())
    }

    async fn add_worksheet(
        &self,
        doc: &DocumentId,
        title: &str,
        _rows: usize,
        _cols: usize,
    ) -> ProviderResult<()> {
        let mut state = self.begin(
            OpKind::AddSheet,
            doc,
            ProviderOp::AddSheet {
                doc: doc.to_string(),
                title: title.to_string(),
            },
        )?;
        let book = workbook(&mut state, doc)?;
        if book.sheet(title).is_some() {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                format!("a sheet named '{title}' already exists"),
            ));
        }
        book.sheets.push(Worksheet {
            title: title.to_string(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn read_all(&self, doc: &DocumentId, sheet: &str) -> ProviderResult<Vec<Vec<String>>> {
        let mut state = self.begin(
            OpKind::ReadAll,
            doc,
            ProviderOp::ReadAll {
                doc: doc.to_string(),
                sheet: sheet.to_string(),
            },
        )?;
        let ws = worksheet(&mut state, doc, sheet)?;
        Ok(ws.rows[..used_rows(&ws.rows)].to_vec())
    }

    async fn read_row(
        &self,
        doc: &DocumentId,
        sheet: &str,
        row: usize,
    ) -> ProviderResult<Vec<String>> {
        let mut state = self.begin(
            OpKind::ReadRow,
            doc,
            ProviderOp::ReadRow {
                doc: doc.to_string(),
                sheet: sheet.to_string(),
                row,
            },
        )?;
        let ws = worksheet(&mut state, doc, sheet)?;
        let mut values = row
            .checked_sub(1)
            .and_then(|i| ws.rows.get(i))
            .cloned()
            .unwrap_or_default();
        while values.last().is_some_and(String::is_empty) {
            values.pop();
        }
        Ok(values)
    }

    async fn update_row(
        &self,
        doc: &DocumentId,
        sheet: &str,
        row: usize,
        start_col: usize,
        values: &[String],
    ) -> ProviderResult<()> {
        let mut state = self.begin(
            OpKind::UpdateRow,
            doc,
            ProviderOp::UpdateRow {
                doc: doc.to_string(),
                sheet: sheet.to_string(),
                row,
            },
        )?;
        let Some(index) = row.checked_sub(1) else {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                "rows are 1-based",
            ));
        };
        let ws = worksheet(&mut state, doc, sheet)?;
        if ws.rows.len() <= index {
            ws.rows.resize(index + 1, Vec::new());
        }
        let target = &mut ws.rows[index];
        if target.len() < start_col + values.len() {
            target.resize(start_col + values.len(), String::new());
        }
        target[start_col..start_col + values.len()].clone_from_slice(values);
        Ok(())
    }

    async fn delete_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        spans: &[RowSpan],
    ) -> ProviderResult<()> {
        let mut state = self.begin(
            OpKind::DeleteRows,
            doc,
            ProviderOp::DeleteRows {
                doc: doc.to_string(),
                sheet: sheet.to_string(),
                spans: spans.to_vec(),
            },
        )?;
        let ws = worksheet(&mut state, doc, sheet)?;
        for span in spans {
            if span.start == 0 || span.start > span.end {
                return Err(ProviderError::new(
                    ProviderErrorKind::InvalidRequest,
                    format!("invalid row span {span}"),
                ));
            }
            let start = (span.start - 1).min(ws.rows.len());
            let end = span.end.min(ws.rows.len());
            ws.rows.drain(start..end);
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> ProviderResult<()> {
        let mut state = self.begin(
            OpKind::AppendRows,
            doc,
            ProviderOp::AppendRows {
                doc: doc.to_string(),
                sheet: sheet.to_string(),
                count: rows.len(),
            },
        )?;
        let ws = worksheet(&mut state, doc, sheet)?;
        let used = used_rows(&ws.rows);
        ws.rows.truncate(used);
        ws.rows.extend(rows.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        DocumentId::new("doc-1").expect("doc id")
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn read_missing_sheet_is_not_found() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "Data", vec![row(&["a"])]);
        let err = provider.read_all(&doc(), "Other").await.expect_err("missing");
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_spans_bottom_up() {
        let provider = MemoryProvider::new();
        let rows = (1..=8).map(|i| row(&[&i.to_string()])).collect();
        provider.insert_sheet(&doc(), "S", rows);

        provider
            .delete_rows(&doc(), "S", &[RowSpan::new(7, 8), RowSpan::new(2, 4)])
            .await
            .expect("delete");
        let left = provider.sheet_rows(&doc(), "S").expect("sheet");
        assert_eq!(left, vec![row(&["1"]), row(&["5"]), row(&["6"])]);
    }

    #[tokio::test]
    async fn append_goes_after_last_used_row() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![row(&["h"]), row(&["1"]), row(&["", ""])]);
        provider
            .append_rows(&doc(), "S", &[row(&["2"])])
            .await
            .expect("append");
        let rows = provider.read_all(&doc(), "S").await.expect("read");
        assert_eq!(rows, vec![row(&["h"]), row(&["1"]), row(&["2"])]);
    }

    #[tokio::test]
    async fn update_row_widens_grid() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![row(&["a"])]);
        provider
            .update_row(&doc(), "S", 3, 1, &row(&["x", "y"]))
            .await
            .expect("update");
        assert_eq!(
            provider.read_row(&doc(), "S", 3).await.expect("row"),
            row(&["", "x", "y"])
        );
        assert!(provider.read_row(&doc(), "S", 2).await.expect("row").is_empty());
    }

    #[tokio::test]
    async fn injected_fault_fires_then_clears() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![row(&["a"])]);
        provider.inject_fault(OpKind::ReadAll, Some(&doc()), ProviderErrorKind::RateLimited, 2);

        for _ in 0..2 {
            let err = provider.read_all(&doc(), "S").await.expect_err("fault");
            assert_eq!(err.kind, ProviderErrorKind::RateLimited);
        }
        provider.read_all(&doc(), "S").await.expect("cleared");
        assert_eq!(provider.operations().len(), 3);
    }

    #[tokio::test]
    async fn denied_document_rejects_everything() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![]);
        provider.deny_access(&doc());
        let err = provider.worksheet_titles(&doc()).await.expect_err("denied");
        assert_eq!(err.kind, ProviderErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn add_duplicate_sheet_is_rejected() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![]);
        provider
            .add_worksheet(&doc(), "T", 1000, 20)
            .await
            .expect("add");
        assert_eq!(
            provider.worksheet_titles(&doc()).await.expect("titles"),
            ["S", "T"]
        );
        assert!(provider.add_worksheet(&doc(), "T", 1, 1).await.is_err());
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("tabsync-snap-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("books.json");

        let provider = MemoryProvider::new();
        provider.insert_sheet(&doc(), "S", vec![row(&["a", "b"])]);
        provider.save_snapshot(&path).expect("save");

        let loaded = MemoryProvider::load_snapshot(&path).expect("load");
        assert_eq!(loaded.sheet_rows(&doc(), "S"), Some(vec![row(&["a", "b"])]));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
