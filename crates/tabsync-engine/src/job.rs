//! Sync jobs and their configuration-sheet columns.
//!
//! A job is one row of the master workbook's job sheet. Columns are located
//! by header name, accepting either the canonical English name or one of the
//! labels used by existing sheets.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::RowSpan;

/// Identifies which job a destination row belongs to.
///
/// All three parts are stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvenanceKey {
    /// Source document link.
    pub source_link: String,
    /// Source worksheet label (may be empty).
    pub source_sheet: String,
    /// Month tag.
    pub month: String,
}

impl ProvenanceKey {
    /// Creates a key, trimming every part.
    #[must_use]
    pub fn new(source_link: &str, source_sheet: &str, month: &str) -> Self {
        Self {
            source_link: source_link.trim().to_string(),
            source_sheet: source_sheet.trim().to_string(),
            month: month.trim().to_string(),
        }
    }
}

impl fmt::Display for ProvenanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.source_link, self.source_sheet, self.month)
    }
}

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Still being updated; eligible for sync.
    Pending,
    /// Closed; never synced again.
    Finalized,
}

impl JobStatus {
    const PENDING_LABELS: &'static [&'static str] =
        &["pending", "chưa chốt & đang cập nhật", "chưa chốt"];
    const FINALIZED_LABELS: &'static [&'static str] = &["finalized", "đã chốt"];

    /// Parses a status cell, accepting canonical and legacy labels.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        if Self::PENDING_LABELS.contains(&value.as_str()) {
            Some(Self::Pending)
        } else if Self::FINALIZED_LABELS.contains(&value.as_str()) {
            Some(Self::Finalized)
        } else {
            None
        }
    }

    /// Canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Finalized => "Finalized",
        }
    }
}

/// A configured copy from one source region into a destination sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Schedule block this job belongs to.
    pub block_name: String,
    /// 1-based row of this job in the job sheet.
    pub row_number: usize,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Source document link.
    pub source_link: String,
    /// Source worksheet; empty means the first worksheet.
    pub source_sheet: String,
    /// Destination document link.
    pub destination_link: String,
    /// Destination worksheet; empty means the configured default.
    pub destination_sheet: String,
    /// Month tag, part of the provenance key.
    pub month: String,
    /// Column range such as `B:E`; empty means all columns.
    pub range_spec: String,
    /// Filter expression; empty means no filter.
    pub filter: String,
    /// Prepend the column names as a data row.
    pub include_header_as_data: bool,
    /// The source sheet has no header row of its own.
    pub source_headerless: bool,
    /// Last result status written back.
    pub result_status: String,
    /// Last result range written back.
    pub result_range: String,
}

impl SyncJob {
    /// Creates a pending job with empty optional fields.
    #[must_use]
    pub fn new(
        block_name: impl Into<String>,
        source_link: impl Into<String>,
        destination_link: impl Into<String>,
    ) -> Self {
        Self {
            block_name: block_name.into(),
            row_number: 0,
            status: JobStatus::Pending,
            source_link: source_link.into(),
            source_sheet: String::new(),
            destination_link: destination_link.into(),
            destination_sheet: String::new(),
            month: String::new(),
            range_spec: String::new(),
            filter: String::new(),
            include_header_as_data: false,
            source_headerless: false,
            result_status: String::new(),
            result_range: String::new(),
        }
    }

    /// The key that marks this job's rows in the destination.
    #[must_use]
    pub fn provenance_key(&self) -> ProvenanceKey {
        ProvenanceKey::new(&self.source_link, &self.source_sheet, &self.month)
    }

    /// The (link, sheet) pair jobs are grouped by, trimmed.
    #[must_use]
    pub fn destination_key(&self) -> (String, String) {
        (
            self.destination_link.trim().to_string(),
            self.destination_sheet.trim().to_string(),
        )
    }

    /// Only pending jobs are synced.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.status == JobStatus::Pending
    }
}

/// Outcome of one job in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    /// Rows were written (possibly none).
    Success {
        /// Rows appended.
        rows: usize,
        /// Destination rows now holding the job's data.
        range: Option<RowSpan>,
    },
    /// The source could not be fetched or filtered.
    FetchFailed {
        /// Human-readable reason.
        reason: String,
    },
    /// The destination write failed.
    WriteFailed {
        /// Human-readable reason.
        reason: String,
    },
}

impl JobResult {
    /// Returns true for [`JobResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text written to the job's result cell and the run log.
    #[must_use]
    pub fn status_text(&self) -> String {
        match self {
            Self::Success { .. } => "Success".to_string(),
            Self::FetchFailed { reason } => format!("Fetch failed: {reason}"),
            Self::WriteFailed { reason } => format!("Write failed: {reason}"),
        }
    }

    /// Rows appended, zero on failure.
    #[must_use]
    pub const fn rows(&self) -> usize {
        match self {
            Self::Success { rows, .. } => *rows,
            _ => 0,
        }
    }

    /// `"start - end"`, or empty when nothing was written.
    #[must_use]
    pub fn range_text(&self) -> String {
        match self {
            Self::Success {
                range: Some(span), ..
            } => span.to_string(),
            _ => String::new(),
        }
    }

    /// Low-cardinality label for metrics.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::WriteFailed { .. } => "write_failed",
        }
    }
}

/// A job and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The job as configured at the start of the run.
    pub job: SyncJob,
    /// Its result.
    pub result: JobResult,
}

/// Columns of the job sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobColumn {
    /// Schedule block name.
    Block,
    /// Lifecycle status.
    Status,
    /// Column range.
    Range,
    /// Month tag.
    Month,
    /// Source document link.
    SourceLink,
    /// Source worksheet.
    SourceSheet,
    /// Destination document link.
    DestinationLink,
    /// Destination worksheet.
    DestinationSheet,
    /// Filter expression.
    Filter,
    /// Header-as-data flag.
    IncludeHeader,
    /// Headerless-source flag.
    SourceHeadless,
    /// Result status written back.
    Result,
    /// Result range written back.
    ResultRange,
}

impl JobColumn {
    /// Every column, in canonical sheet order.
    pub const ALL: [Self; 13] = [
        Self::Block,
        Self::Status,
        Self::Range,
        Self::Month,
        Self::SourceLink,
        Self::SourceSheet,
        Self::DestinationLink,
        Self::DestinationSheet,
        Self::ResultRange,
        Self::Result,
        Self::Filter,
        Self::IncludeHeader,
        Self::SourceHeadless,
    ];

    /// Canonical header name.
    #[must_use]
    pub const fn canonical(self) -> &'static str {
        match self {
            Self::Block => "Block",
            Self::Status => "Status",
            Self::Range => "Range",
            Self::Month => "Month",
            Self::SourceLink => "Source Link",
            Self::SourceSheet => "Source Sheet",
            Self::DestinationLink => "Destination Link",
            Self::DestinationSheet => "Destination Sheet",
            Self::Filter => "Filter",
            Self::IncludeHeader => "Include Header",
            Self::SourceHeadless => "Source Headerless",
            Self::Result => "Result",
            Self::ResultRange => "Result Range",
        }
    }

    /// Legacy header labels.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Block => &["Block_Name"],
            Self::Status => &["Trạng thái"],
            Self::Range => &["Vùng lấy dữ liệu"],
            Self::Month => &["Tháng"],
            Self::SourceLink => &["Link dữ liệu lấy dữ liệu", "Link file nguồn"],
            Self::SourceSheet => &["Tên sheet nguồn dữ liệu gốc", "Sheet nguồn"],
            Self::DestinationLink => &["Link dữ liệu đích"],
            Self::DestinationSheet => &["Tên sheet dữ liệu đích"],
            Self::Filter => &["Dieu_Kien_Loc", "Điều_kiện_lọc"],
            Self::IncludeHeader => &["Lay_Header", "Lấy_tiêu_đề"],
            Self::SourceHeadless => &["Nguon_Khong_Header"],
            Self::Result => &["Kết quả"],
            Self::ResultRange => &["Dòng dữ liệu"],
        }
    }

    fn matches(self, header: &str) -> bool {
        let header = header.trim();
        header.eq_ignore_ascii_case(self.canonical())
            || self
                .aliases()
                .iter()
                .any(|alias| header.to_lowercase() == alias.to_lowercase())
    }
}

/// Positions of known columns in a job sheet header.
#[derive(Debug, Clone, Default)]
pub struct JobColumns {
    positions: HashMap<JobColumn, usize>,
}

impl JobColumns {
    /// Locates known columns in `headers`; the first match wins.
    #[must_use]
    pub fn locate(headers: &[String]) -> Self {
        let mut positions = HashMap::new();
        for column in JobColumn::ALL {
            if let Some(index) = headers.iter().position(|h| column.matches(h)) {
                positions.insert(column, index);
            }
        }
        Self { positions }
    }

    /// Zero-based position of a column.
    #[must_use]
    pub fn position(&self, column: JobColumn) -> Option<usize> {
        self.positions.get(&column).copied()
    }

    /// Columns the sheet must carry for jobs to be read at all.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            JobColumn::Block,
            JobColumn::Status,
            JobColumn::SourceLink,
            JobColumn::DestinationLink,
        ]
        .into_iter()
        .filter(|c| !self.positions.contains_key(c))
        .map(JobColumn::canonical)
        .collect()
    }

    fn cell<'a>(&self, row: &'a [String], column: JobColumn) -> &'a str {
        self.position(column)
            .and_then(|i| row.get(i))
            .map_or("", |s| s.trim())
    }

    /// Reads one job from a sheet row; `None` for rows with no source link.
    #[must_use]
    pub fn parse_row(&self, row_number: usize, row: &[String]) -> Option<SyncJob> {
        let source_link = self.cell(row, JobColumn::SourceLink);
        if source_link.is_empty() {
            return None;
        }
        let status_cell = self.cell(row, JobColumn::Status);
        let status = JobStatus::parse(status_cell).unwrap_or_else(|| {
            tracing::debug!(row_number, status = status_cell, "unrecognised job status");
            JobStatus::Finalized
        });

        Some(SyncJob {
            block_name: self.cell(row, JobColumn::Block).to_string(),
            row_number,
            status,
            source_link: source_link.to_string(),
            source_sheet: self.cell(row, JobColumn::SourceSheet).to_string(),
            destination_link: self.cell(row, JobColumn::DestinationLink).to_string(),
            destination_sheet: self.cell(row, JobColumn::DestinationSheet).to_string(),
            month: self.cell(row, JobColumn::Month).to_string(),
            range_spec: self.cell(row, JobColumn::Range).to_string(),
            filter: self.cell(row, JobColumn::Filter).to_string(),
            include_header_as_data: parse_flag(self.cell(row, JobColumn::IncludeHeader)),
            source_headerless: parse_flag(self.cell(row, JobColumn::SourceHeadless)),
            result_status: self.cell(row, JobColumn::Result).to_string(),
            result_range: self.cell(row, JobColumn::ResultRange).to_string(),
        })
    }
}

/// Sheet checkbox values: `TRUE`, `1`, `yes`, `x` are true; anything else is false.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "x"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn status_accepts_legacy_labels() {
        assert_eq!(
            JobStatus::parse("Chưa chốt & đang cập nhật"),
            Some(JobStatus::Pending)
        );
        assert_eq!(JobStatus::parse(" pending "), Some(JobStatus::Pending));
        assert_eq!(JobStatus::parse("Đã chốt"), Some(JobStatus::Finalized));
        assert_eq!(JobStatus::parse("archived"), None);
    }

    #[test]
    fn provenance_key_is_trimmed() {
        let mut job = SyncJob::new("b", " https://docs.google.com/spreadsheets/d/abc ", "d");
        job.source_sheet = " Data ".into();
        job.month = "05/2024 ".into();
        let key = job.provenance_key();
        assert_eq!(key.source_link, "https://docs.google.com/spreadsheets/d/abc");
        assert_eq!(key.source_sheet, "Data");
        assert_eq!(key.month, "05/2024");
    }

    #[test]
    fn locate_legacy_headers() {
        let headers = s(&[
            "Block_Name",
            "Trạng thái",
            "Vùng lấy dữ liệu",
            "Tháng",
            "Link dữ liệu lấy dữ liệu",
            "Link dữ liệu đích",
            "Tên sheet nguồn dữ liệu gốc",
            "Tên sheet dữ liệu đích",
            "Kết quả",
            "Dòng dữ liệu",
            "Dieu_Kien_Loc",
            "Lay_Header",
        ]);
        let columns = JobColumns::locate(&headers);
        assert!(columns.missing_required().is_empty());
        assert_eq!(columns.position(JobColumn::DestinationLink), Some(5));
        assert_eq!(columns.position(JobColumn::SourceHeadless), None);

        let row = s(&[
            "Block A",
            "Chưa chốt & đang cập nhật",
            "B:D",
            "05/2024",
            "https://docs.google.com/spreadsheets/d/src",
            "https://docs.google.com/spreadsheets/d/dst",
            "Data",
            "",
            "",
            "",
            "Amount>100",
            "TRUE",
        ]);
        let job = columns.parse_row(7, &row).expect("job row");
        assert_eq!(job.row_number, 7);
        assert!(job.is_eligible());
        assert_eq!(job.range_spec, "B:D");
        assert!(job.include_header_as_data);
        assert!(!job.source_headerless);
    }

    #[test]
    fn canonical_headers_are_case_insensitive() {
        let columns = JobColumns::locate(&s(&["block", "STATUS", "source link", "Destination Link"]));
        assert!(columns.missing_required().is_empty());
    }

    #[test]
    fn rows_without_source_are_skipped() {
        let columns = JobColumns::locate(&s(&["Block", "Status", "Source Link", "Destination Link"]));
        assert!(columns.parse_row(3, &s(&["A", "Pending", " ", "x"])).is_none());
    }

    #[test]
    fn result_text() {
        let ok = JobResult::Success {
            rows: 3,
            range: Some(RowSpan::new(5, 7)),
        };
        assert_eq!(ok.range_text(), "5 - 7");
        assert_eq!(ok.status_text(), "Success");
        let failed = JobResult::FetchFailed {
            reason: "sheet 'X' not found".into(),
        };
        assert_eq!(failed.rows(), 0);
        assert!(failed.status_text().starts_with("Fetch failed"));
    }
}
