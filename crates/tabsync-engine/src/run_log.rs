//! Run log lines: one per job per run.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::job::JobOutcome;

/// Timestamp format used in every log sheet.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Header written when the run log sheet is created.
pub const RUN_LOG_HEADER: [&str; 12] = [
    "Time",
    "Range",
    "Month",
    "Actor",
    "Source Link",
    "Destination Link",
    "Destination Sheet",
    "Source Sheet",
    "Status",
    "Rows",
    "Row Range",
    "Block",
];

/// Formats `at` in `tz` for a log sheet.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string()
}

/// One job's entry in the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogLine {
    /// Run start.
    pub at: DateTime<Utc>,
    /// Range spec as configured.
    pub range_spec: String,
    /// Month tag.
    pub month: String,
    /// Who ran it.
    pub actor: String,
    /// Source document link.
    pub source_link: String,
    /// Destination document link.
    pub destination_link: String,
    /// Destination sheet as configured.
    pub destination_sheet: String,
    /// Source sheet.
    pub source_sheet: String,
    /// Result status text.
    pub status: String,
    /// Rows appended.
    pub rows: usize,
    /// `"start - end"` or empty.
    pub range: String,
    /// Schedule block.
    pub block: String,
}

impl RunLogLine {
    /// Builds the line for one job outcome.
    #[must_use]
    pub fn from_outcome(at: DateTime<Utc>, actor: &str, outcome: &JobOutcome) -> Self {
        let job = &outcome.job;
        Self {
            at,
            range_spec: job.range_spec.clone(),
            month: job.month.clone(),
            actor: actor.to_string(),
            source_link: job.source_link.clone(),
            destination_link: job.destination_link.clone(),
            destination_sheet: job.destination_sheet.clone(),
            source_sheet: job.source_sheet.clone(),
            status: outcome.result.status_text(),
            rows: outcome.result.rows(),
            range: outcome.result.range_text(),
            block: job.block_name.clone(),
        }
    }

    /// Sheet row in [`RUN_LOG_HEADER`] order.
    #[must_use]
    pub fn to_row(&self, tz: Tz) -> Vec<String> {
        vec![
            format_timestamp(self.at, tz),
            self.range_spec.clone(),
            self.month.clone(),
            self.actor.clone(),
            self.source_link.clone(),
            self.destination_link.clone(),
            self.destination_sheet.clone(),
            self.source_sheet.clone(),
            self.status.clone(),
            self.rows.to_string(),
            self.range.clone(),
            self.block.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobResult, SyncJob};
    use crate::provider::RowSpan;
    use chrono::TimeZone;

    #[test]
    fn row_matches_header_order() {
        let mut job = SyncJob::new("Block A", "https://src", "https://dst");
        job.month = "05/2024".into();
        job.source_sheet = "Data".into();
        let outcome = JobOutcome {
            job,
            result: JobResult::Success {
                rows: 2,
                range: Some(RowSpan::new(4, 5)),
            },
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 1, 2, 3).single().expect("time");
        let row = RunLogLine::from_outcome(at, "AUTO_BOT", &outcome).to_row(chrono_tz::Asia::Ho_Chi_Minh);

        assert_eq!(row.len(), RUN_LOG_HEADER.len());
        assert_eq!(row[0], "06/05/2024 08:02:03");
        assert_eq!(row[3], "AUTO_BOT");
        assert_eq!(row[7], "Data");
        assert_eq!(row[8], "Success");
        assert_eq!(row[9], "2");
        assert_eq!(row[10], "4 - 5");
        assert_eq!(row[11], "Block A");
    }

    #[test]
    fn failed_fetch_logs_zero_rows() {
        let outcome = JobOutcome {
            job: SyncJob::new("b", "x", "y"),
            result: JobResult::FetchFailed {
                reason: "boom".into(),
            },
        };
        let line = RunLogLine::from_outcome(Utc::now(), "bot", &outcome);
        assert_eq!(line.rows, 0);
        assert_eq!(line.range, "");
        assert_eq!(line.status, "Fetch failed: boom");
    }
}
