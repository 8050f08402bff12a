//! Spreadsheet provider abstraction.
//!
//! The engine never talks to a spreadsheet service directly; everything goes
//! through [`SpreadsheetProvider`]. Rows are 1-based as in A1 notation, and
//! row 1 is the header row of every data sheet.
//!
//! Implementations:
//!
//! - [`MemoryProvider`]: in-memory workbooks with operation recording, fault
//!   injection and JSON snapshots
//! - `GoogleSheetsProvider` (feature `gcp`): Sheets API v4

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabsync_core::DocumentId;

pub mod memory;
#[cfg(feature = "gcp")]
pub mod sheets;

pub use memory::{Fault, MemoryProvider, OpKind, ProviderOp, Workbook, Worksheet};
#[cfg(feature = "gcp")]
pub use sheets::{GoogleSheetsProvider, SheetsConfig};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Quota or rate limit exceeded (HTTP 429).
    RateLimited,
    /// Temporary server-side failure (HTTP 5xx, timeouts).
    Transient,
    /// Document or worksheet does not exist.
    NotFound,
    /// Caller lacks access to the document.
    PermissionDenied,
    /// The request was rejected as malformed.
    InvalidRequest,
    /// Anything else.
    Other,
}

impl ProviderErrorKind {
    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error ({kind}): {message}")]
pub struct ProviderError {
    /// Failure class, drives retry decisions.
    pub kind: ProviderErrorKind,
    /// Provider message.
    pub message: String,
}

impl ProviderError {
    /// Creates a provider error.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// An inclusive span of 1-based sheet rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowSpan {
    /// First row.
    pub start: usize,
    /// Last row (inclusive).
    pub end: usize,
}

impl RowSpan {
    /// Creates a span; `start` must not exceed `end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of rows covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    /// Always false; a span covers at least one row.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for RowSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Access to spreadsheet documents.
#[async_trait]
pub trait SpreadsheetProvider: Send + Sync {
    /// Lists worksheet titles in document order.
    async fn worksheet_titles(&self, doc: &DocumentId) -> ProviderResult<Vec<String>>;

    /// Creates an empty worksheet with the given grid size.
    async fn add_worksheet(
        &self,
        doc: &DocumentId,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> ProviderResult<()>;

    /// Reads every non-empty row of a worksheet.
    async fn read_all(&self, doc: &DocumentId, sheet: &str) -> ProviderResult<Vec<Vec<String>>>;

    /// Reads one row (empty if the row is blank).
    async fn read_row(&self, doc: &DocumentId, sheet: &str, row: usize)
    -> ProviderResult<Vec<String>>;

    /// Writes `values` into `row` starting at zero-based column `start_col`.
    async fn update_row(
        &self,
        doc: &DocumentId,
        sheet: &str,
        row: usize,
        start_col: usize,
        values: &[String],
    ) -> ProviderResult<()>;

    /// Deletes row spans in one request, applying them in the order given.
    ///
    /// Callers pass spans bottom-up so earlier deletions do not shift later ones.
    async fn delete_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        spans: &[RowSpan],
    ) -> ProviderResult<()>;

    /// Appends rows after the last non-empty row.
    async fn append_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(ProviderErrorKind::Transient.is_retryable());
        assert!(!ProviderErrorKind::NotFound.is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::PermissionDenied, "no").is_retryable());
    }

    #[test]
    fn row_span_display_and_len() {
        let span = RowSpan::new(7, 9);
        assert_eq!(span.to_string(), "7 - 9");
        assert_eq!(span.len(), 3);
    }
}
