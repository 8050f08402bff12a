//! Source fetch adapter.
//!
//! Turns one job into a [`SourceDataset`]: read the source grid, name its
//! columns, slice, filter, and tag every row with the job's provenance key.
//! Each fetch is independent of every other, so the engine can run them in
//! any order or with bounded concurrency.

use tabsync_core::DocumentId;

use crate::config::ProvenanceColumns;
use crate::error::{Error, Result};
use crate::filter::apply_filter;
use crate::job::{ProvenanceKey, SyncJob};
use crate::provider::SpreadsheetProvider;
use crate::range::ColumnRange;
use crate::retry::{RetryPolicy, with_retry};
use crate::schema::{ColumnMapping, dedupe_headers};
use crate::table::Table;

/// Cell values rendered as empty text.
const NULL_MARKERS: &[&str] = &["nan", "none", "null", "<na>"];

/// One job to fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// The job.
    pub job: &'a SyncJob,
    /// Current destination header, if the caller knows it.
    pub destination_headers: Option<&'a [String]>,
}

impl<'a> FetchRequest<'a> {
    /// A request with no destination header.
    #[must_use]
    pub const fn new(job: &'a SyncJob) -> Self {
        Self {
            job,
            destination_headers: None,
        }
    }

    /// Sets the destination header used to name headerless sources.
    #[must_use]
    pub const fn with_destination_headers(mut self, headers: &'a [String]) -> Self {
        self.destination_headers = Some(headers);
        self
    }
}

/// A fetched, shaped and tagged source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDataset {
    /// Provenance key carried by every row.
    pub key: ProvenanceKey,
    /// Job sheet row the dataset came from.
    pub row_number: usize,
    /// How source columns were named.
    pub mapping: ColumnMapping,
    /// Rows, with the provenance columns last.
    pub table: Table,
}

impl SourceDataset {
    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Fetches source datasets through a provider.
pub struct SourceFetcher<'a> {
    provider: &'a dyn SpreadsheetProvider,
    retry: &'a RetryPolicy,
    provenance: &'a ProvenanceColumns,
}

impl<'a> SourceFetcher<'a> {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        provider: &'a dyn SpreadsheetProvider,
        retry: &'a RetryPolicy,
        provenance: &'a ProvenanceColumns,
    ) -> Self {
        Self {
            provider,
            retry,
            provenance,
        }
    }

    /// Fetches and shapes one job's source table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkFormat`] for a malformed link,
    /// [`Error::SheetNotFound`] for a missing worksheet,
    /// [`Error::FilterSyntax`] for a bad filter, and provider errors once
    /// retries are exhausted.
    pub async fn fetch(&self, request: FetchRequest<'_>) -> Result<SourceDataset> {
        let job = request.job;
        let link = job.source_link.trim();
        let doc = DocumentId::from_link(link)?;
        let sheet = self.resolve_sheet(&doc, link, job.source_sheet.trim()).await?;

        let grid = with_retry(self.retry, "read_all", || self.provider.read_all(&doc, &sheet))
            .await
            .map_err(|e| Error::from_read_failure(link, e))?;

        let (mut table, mapping) = if grid.is_empty() {
            tracing::debug!(document = %doc, sheet = %sheet, "source sheet is empty");
            (Table::default(), ColumnMapping::identity(&[]))
        } else {
            let (mut table, mapping) = self.shape(grid, job, request.destination_headers);
            table = ColumnRange::parse(Some(&job.range_spec)).slice(&table);
            apply_filter(&mut table, &job.filter)?;
            if job.include_header_as_data && table.width() > 0 {
                let header_row = table.headers().to_vec();
                table.prepend_row(header_row);
            }
            (table, mapping)
        };

        table.map_cells(|cell| {
            if NULL_MARKERS.contains(&cell.trim().to_lowercase().as_str()) {
                cell.clear();
            }
        });

        let key = job.provenance_key();
        let [link_col, sheet_col, month_col] = self.provenance.names();
        table.set_constant_column(link_col, &key.source_link);
        table.set_constant_column(sheet_col, &key.source_sheet);
        table.set_constant_column(month_col, &key.month);

        tracing::debug!(
            document = %doc,
            sheet = %sheet,
            row_number = job.row_number,
            rows = table.len(),
            "fetched source"
        );

        Ok(SourceDataset {
            key,
            row_number: job.row_number,
            mapping,
            table,
        })
    }

    async fn resolve_sheet(&self, doc: &DocumentId, link: &str, label: &str) -> Result<String> {
        let titles = with_retry(self.retry, "worksheet_titles", || {
            self.provider.worksheet_titles(doc)
        })
        .await
        .map_err(|e| Error::from_read_failure(link, e))?;

        let found = if label.is_empty() {
            titles.into_iter().next()
        } else {
            titles.into_iter().find(|t| t == label)
        };
        found.ok_or_else(|| Error::SheetNotFound {
            document: doc.to_string(),
            sheet: if label.is_empty() {
                "<first sheet>".to_string()
            } else {
                label.to_string()
            },
        })
    }

    fn shape(
        &self,
        grid: Vec<Vec<String>>,
        job: &SyncJob,
        destination_headers: Option<&[String]>,
    ) -> (Table, ColumnMapping) {
        if !job.source_headerless {
            let mut table = Table::from_grid(grid);
            let unique = dedupe_headers(table.headers());
            table.rename_columns(unique);
            let mapping = ColumnMapping::identity(table.headers());
            return (table, mapping);
        }

        let mut table = Table::from_rows_lettered(grid);
        let target: Vec<String> = destination_headers
            .unwrap_or_default()
            .iter()
            .filter(|h| !self.provenance.contains(h))
            .cloned()
            .collect();
        if target.is_empty() {
            let mapping = ColumnMapping::identity(table.headers());
            return (table, mapping);
        }
        let mapping = ColumnMapping::positional(table.headers(), &target);
        if !mapping.dropped().is_empty() {
            tracing::debug!(
                row_number = job.row_number,
                dropped = mapping.dropped().len(),
                "source wider than destination; extra columns dropped"
            );
        }
        mapping.apply(&mut table);
        (table, mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, ProviderErrorKind};
    use crate::schema::MappingKind;

    const SRC: &str = "https://docs.google.com/spreadsheets/d/src123/edit";

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn src() -> DocumentId {
        DocumentId::new("src123").expect("doc id")
    }

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.insert_sheet(
            &src(),
            "Data",
            vec![
                s(&["Name", "City", "Amount"]),
                s(&["A", "HN", "150"]),
                s(&["B", "HCM", "50"]),
            ],
        );
        provider
    }

    fn job() -> SyncJob {
        let mut job = SyncJob::new("block", SRC, "https://docs.google.com/spreadsheets/d/dst/edit");
        job.source_sheet = "Data".into();
        job.month = "05/2024".into();
        job.row_number = 2;
        job
    }

    async fn fetch(provider: &MemoryProvider, request: FetchRequest<'_>) -> Result<SourceDataset> {
        let retry = RetryPolicy::immediate(2);
        let provenance = ProvenanceColumns::default();
        SourceFetcher::new(provider, &retry, &provenance)
            .fetch(request)
            .await
    }

    #[tokio::test]
    async fn filters_and_tags_rows() {
        let provider = provider();
        let mut job = job();
        job.filter = "Amount>100".into();
        let dataset = fetch(&provider, FetchRequest::new(&job)).await.expect("fetch");

        assert_eq!(
            dataset.table.headers(),
            s(&["Name", "City", "Amount", "Source Link", "Source Sheet", "Month"]).as_slice()
        );
        assert_eq!(
            dataset.table.rows(),
            [s(&["A", "HN", "150", SRC, "Data", "05/2024"])].as_slice()
        );
        assert_eq!(dataset.key, job.provenance_key());
        assert_eq!(dataset.row_number, 2);
    }

    #[tokio::test]
    async fn header_as_data_after_slice() {
        let provider = provider();
        let mut job = job();
        job.range_spec = "B:C".into();
        job.include_header_as_data = true;
        let dataset = fetch(&provider, FetchRequest::new(&job)).await.expect("fetch");
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.table.rows()[0][..2], s(&["City", "Amount"]));
        assert_eq!(dataset.table.rows()[0][3], "Data");
    }

    #[tokio::test]
    async fn blank_label_uses_first_sheet() {
        let provider = provider();
        provider.insert_sheet(&src(), "Other", vec![s(&["X"]), s(&["1"])]);
        let mut job = job();
        job.source_sheet = String::new();
        let dataset = fetch(&provider, FetchRequest::new(&job)).await.expect("fetch");
        assert_eq!(dataset.table.headers()[0], "Name");
        assert_eq!(dataset.key.source_sheet, "");
    }

    #[tokio::test]
    async fn missing_sheet_and_bad_link() {
        let provider = provider();
        let mut missing = job();
        missing.source_sheet = "Nope".into();
        let err = fetch(&provider, FetchRequest::new(&missing)).await.expect_err("missing");
        assert!(matches!(err, Error::SheetNotFound { .. }));

        let mut bad = job();
        bad.source_link = "not a link".into();
        let err = fetch(&provider, FetchRequest::new(&bad)).await.expect_err("bad link");
        assert!(matches!(err, Error::LinkFormat { .. }));
    }

    #[tokio::test]
    async fn filter_error_fails_job() {
        let provider = provider();
        let mut job = job();
        job.filter = "Missing>1".into();
        let err = fetch(&provider, FetchRequest::new(&job)).await.expect_err("filter");
        assert!(matches!(err, Error::FilterSyntax { .. }));
    }

    #[tokio::test]
    async fn duplicate_headers_and_null_markers() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(
            &src(),
            "Data",
            vec![s(&["a", "a", "b"]), s(&["1", "nan", "None"])],
        );
        let dataset = fetch(&provider, FetchRequest::new(&job())).await.expect("fetch");
        assert_eq!(dataset.table.headers()[..3], s(&["a", "a_1", "b"]));
        assert_eq!(dataset.table.rows()[0][..3], s(&["1", "", ""]));
    }

    #[tokio::test]
    async fn headerless_source_takes_destination_names() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(
            &src(),
            "Data",
            vec![s(&["A", "HN", "150", "extra"]), s(&["B", "HCM", "50", "x"])],
        );
        let mut job = job();
        job.source_headerless = true;
        let destination = s(&["Name", "City", "Amount", "Source Link", "Source Sheet", "Month"]);

        let dataset = fetch(
            &provider,
            FetchRequest::new(&job).with_destination_headers(&destination),
        )
        .await
        .expect("fetch");
        assert_eq!(dataset.mapping.kind(), MappingKind::Positional);
        assert_eq!(dataset.table.headers(), destination.as_slice());
        assert_eq!(dataset.len(), 2);

        let lettered = fetch(&provider, FetchRequest::new(&job)).await.expect("fetch");
        assert_eq!(lettered.table.headers()[..4], s(&["A", "B", "C", "D"]));
    }

    #[tokio::test]
    async fn empty_sheet_yields_empty_dataset() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&src(), "Data", Vec::new());
        let mut job = job();
        job.filter = "Amount>1".into();
        let dataset = fetch(&provider, FetchRequest::new(&job)).await.expect("fetch");
        assert!(dataset.is_empty());
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let provider = provider();
        provider.inject_fault(
            crate::provider::OpKind::ReadAll,
            Some(&src()),
            ProviderErrorKind::Transient,
            1,
        );
        let dataset = fetch(&provider, FetchRequest::new(&job())).await.expect("retried");
        assert_eq!(dataset.len(), 2);
    }
}
