//! Destination reconciler.
//!
//! Writes every dataset bound for one destination sheet with replace-by-key
//! semantics: rows already carrying one of the payload's provenance keys are
//! deleted, then the fresh payload is appended. Running the same jobs twice
//! leaves the destination unchanged.
//!
//! Failure handling is per group. A failure part-way through leaves earlier
//! groups untouched, and datasets whose rows were fully appended before the
//! failure keep their success.

use std::collections::HashSet;

use tabsync_core::DocumentId;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::SourceDataset;
use crate::job::{JobResult, ProvenanceKey};
use crate::metrics::SyncMetrics;
use crate::provider::{RowSpan, SpreadsheetProvider};
use crate::retry::with_retry;
use crate::schema::{ColumnProjection, widen_header};
use crate::table::Table;

/// Grid size of a newly created destination sheet.
const NEW_SHEET_ROWS: usize = 1000;
const NEW_SHEET_COLS: usize = 20;

/// Coalesces 1-based row numbers into maximal ascending spans.
///
/// Duplicates are ignored; `{2,3,4,7,8,10}` becomes `[2-4, 7-8, 10-10]`.
#[must_use]
pub fn coalesce_rows(rows: &[usize]) -> Vec<RowSpan> {
    let mut sorted = rows.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut spans: Vec<RowSpan> = Vec::new();
    for row in sorted {
        match spans.last_mut() {
            Some(span) if span.end + 1 == row => span.end = row,
            _ => spans.push(RowSpan::new(row, row)),
        }
    }
    spans
}

/// Finds body rows whose provenance triple is in `keys`.
///
/// `grid` is the full sheet including the header row; returned numbers are
/// 1-based sheet rows. Cells are compared trimmed.
#[must_use]
pub fn stale_rows(
    grid: &[Vec<String>],
    provenance: [&str; 3],
    keys: &HashSet<ProvenanceKey>,
) -> Vec<usize> {
    let Some(header) = grid.first() else {
        return Vec::new();
    };
    let position = |name: &str| header.iter().position(|h| h.trim() == name);
    let (Some(link), Some(sheet), Some(month)) = (
        position(provenance[0]),
        position(provenance[1]),
        position(provenance[2]),
    ) else {
        return Vec::new();
    };

    let cell = |row: &[String], i: usize| row.get(i).map_or("", |c| c.trim()).to_string();
    grid.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, row)| {
            keys.contains(&ProvenanceKey {
                source_link: cell(row.as_slice(), link),
                source_sheet: cell(row.as_slice(), sheet),
                month: cell(row.as_slice(), month),
            })
        })
        .map(|(i, _)| i + 1)
        .collect()
}

/// What happened to one destination group.
#[derive(Debug)]
pub struct GroupReport {
    /// Destination worksheet title actually written.
    pub sheet: String,
    /// Stale rows deleted.
    pub deleted: usize,
    /// Rows appended.
    pub appended: usize,
    /// One result per dataset, in input order.
    pub results: Vec<JobResult>,
    /// The failure that stopped the group, if any.
    pub error: Option<Error>,
}

/// Progress made before a failure.
#[derive(Debug, Default)]
struct Progress {
    sheet: String,
    deleted: usize,
    start_row: Option<usize>,
    appended: usize,
}

/// Reconciles datasets into destination sheets.
pub struct DestinationReconciler<'a> {
    provider: &'a dyn SpreadsheetProvider,
    config: &'a SyncConfig,
    metrics: SyncMetrics,
}

impl<'a> DestinationReconciler<'a> {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(provider: &'a dyn SpreadsheetProvider, config: &'a SyncConfig) -> Self {
        Self {
            provider,
            config,
            metrics: SyncMetrics::new(),
        }
    }

    /// Checks that the destination link parses and the document is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkFormat`] or [`Error::Permission`], or the provider
    /// error once retries are exhausted.
    pub async fn preflight(&self, link: &str) -> Result<DocumentId> {
        let link = link.trim();
        let doc = DocumentId::from_link(link)?;
        with_retry(&self.config.retry, "worksheet_titles", || {
            self.provider.worksheet_titles(&doc)
        })
        .await
        .map_err(|e| Error::from_write_failure(link, e))?;
        Ok(doc)
    }

    /// Writes `datasets` into one destination sheet.
    ///
    /// Never fails as a whole: failures are reported per dataset.
    pub async fn reconcile(
        &self,
        link: &str,
        sheet: &str,
        datasets: &[SourceDataset],
    ) -> GroupReport {
        let mut progress = Progress::default();
        let outcome = self.write(link.trim(), sheet.trim(), datasets, &mut progress).await;
        self.metrics.record_rows_deleted(progress.deleted);
        self.metrics.record_rows_appended(progress.appended);

        let error = outcome.err();
        let reason = error.as_ref().map(ToString::to_string);
        let mut results = Vec::with_capacity(datasets.len());
        let mut offset = 0;
        for dataset in datasets {
            let count = dataset.len();
            let written = offset + count <= progress.appended;
            let result = match (&reason, progress.start_row) {
                (Some(reason), _) if !written || progress.start_row.is_none() => {
                    JobResult::WriteFailed {
                        reason: reason.clone(),
                    }
                }
                (_, Some(start)) if count > 0 => JobResult::Success {
                    rows: count,
                    range: Some(RowSpan::new(start + offset, start + offset + count - 1)),
                },
                _ => JobResult::Success {
                    rows: 0,
                    range: None,
                },
            };
            results.push(result);
            offset += count;
        }

        if let Some(error) = &error {
            self.metrics.record_failure(error.category());
            tracing::warn!(
                sheet = %progress.sheet,
                deleted = progress.deleted,
                appended = progress.appended,
                error = %error,
                "destination write failed"
            );
        } else {
            tracing::info!(
                sheet = %progress.sheet,
                deleted = progress.deleted,
                appended = progress.appended,
                "destination reconciled"
            );
        }

        GroupReport {
            sheet: progress.sheet,
            deleted: progress.deleted,
            appended: progress.appended,
            results,
            error,
        }
    }

    async fn write(
        &self,
        link: &str,
        sheet: &str,
        datasets: &[SourceDataset],
        progress: &mut Progress,
    ) -> Result<()> {
        let doc = DocumentId::from_link(link)?;
        let sheet = if sheet.is_empty() {
            self.config.default_destination_sheet.clone()
        } else {
            sheet.to_string()
        };
        progress.sheet.clone_from(&sheet);
        let fail = |e| Error::from_write_failure(link, e);
        let retry = &self.config.retry;
        let provider = self.provider;

        let titles = with_retry(retry, "worksheet_titles", || provider.worksheet_titles(&doc))
            .await
            .map_err(fail)?;
        if !titles.contains(&sheet) {
            with_retry(retry, "add_worksheet", || {
                provider.add_worksheet(&doc, &sheet, NEW_SHEET_ROWS, NEW_SHEET_COLS)
            })
            .await
            .map_err(fail)?;
            tracing::info!(document = %doc, sheet = %sheet, "created destination sheet");
        }

        let combined = Table::concat(datasets.iter().map(|d| &d.table));
        if combined.is_empty() {
            progress.start_row = Some(0);
            return Ok(());
        }

        let header = self.ensure_header(&doc, &sheet, link, combined.headers()).await?;
        let projection = ColumnProjection::new(combined.headers(), &header);
        if !projection.unmapped().is_empty() {
            tracing::warn!(
                sheet = %sheet,
                columns = ?projection.unmapped(),
                "payload columns missing from destination header are not written"
            );
        }
        let payload = projection.project(&combined);

        let keys: HashSet<ProvenanceKey> = datasets
            .iter()
            .filter(|d| !d.is_empty())
            .map(|d| d.key.clone())
            .collect();
        let grid = with_retry(retry, "read_all", || provider.read_all(&doc, &sheet))
            .await
            .map_err(fail)?;
        let stale = stale_rows(&grid, self.config.provenance.names(), &keys);
        let spans = coalesce_rows(&stale);

        let mut bottom_up = spans;
        bottom_up.reverse();
        for (i, batch) in bottom_up.chunks(self.config.delete_batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            with_retry(retry, "delete_rows", || provider.delete_rows(&doc, &sheet, batch))
                .await
                .map_err(fail)?;
            progress.deleted += batch.iter().map(RowSpan::len).sum::<usize>();
        }

        let used = with_retry(retry, "read_all", || provider.read_all(&doc, &sheet))
            .await
            .map_err(fail)?
            .len();
        progress.start_row = Some(used + 1);

        for (i, chunk) in payload.chunks(self.config.append_chunk_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            with_retry(retry, "append_rows", || provider.append_rows(&doc, &sheet, chunk))
                .await
                .map_err(fail)?;
            progress.appended += chunk.len();
        }
        Ok(())
    }

    /// Returns the destination header, creating or widening it as needed.
    async fn ensure_header(
        &self,
        doc: &DocumentId,
        sheet: &str,
        link: &str,
        payload_headers: &[String],
    ) -> Result<Vec<String>> {
        let retry = &self.config.retry;
        let provider = self.provider;
        let fail = |e| Error::from_write_failure(link, e);

        let existing = with_retry(retry, "read_row", || provider.read_row(doc, sheet, 1))
            .await
            .map_err(fail)?;
        if existing.is_empty() {
            with_retry(retry, "update_row", || {
                provider.update_row(doc, sheet, 1, 0, payload_headers)
            })
            .await
            .map_err(fail)?;
            return Ok(payload_headers.to_vec());
        }

        let required: Vec<String> = self
            .config
            .provenance
            .names()
            .iter()
            .map(ToString::to_string)
            .collect();
        let Some(widened) = widen_header(&existing, &required) else {
            return Ok(existing);
        };
        let tail = &widened[existing.len()..];
        with_retry(retry, "update_row", || {
            provider.update_row(doc, sheet, 1, existing.len(), tail)
        })
        .await
        .map_err(fail)?;
        tracing::info!(sheet = %sheet, added = tail.len(), "widened destination header");
        Ok(widened)
    }
}
