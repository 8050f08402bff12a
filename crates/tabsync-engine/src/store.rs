//! Master workbook access: jobs, schedule, schedule state and logs.
//!
//! The master workbook is the engine's configuration and reporting storage.
//! Jobs and schedule rows are edited by people; the engine only reads them,
//! writes results back into the job rows, and appends to the log sheets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tabsync_core::DocumentId;

use crate::audit::{AUDIT_LOG_HEADER, AuditEntry};
use crate::config::{SheetTitles, SyncConfig};
use crate::error::{Error, Result};
use crate::job::{JobColumn, JobColumns, JobOutcome, SyncJob};
use crate::provider::{ProviderErrorKind, SpreadsheetProvider};
use crate::retry::{RetryPolicy, with_retry};
use crate::run_log::{RUN_LOG_HEADER, RunLogLine};
use crate::schedule::{ScheduleEntry, ScheduleLedger};

/// Header of the schedule state sheet.
pub const SCHEDULE_STATE_HEADER: [&str; 2] = ["Block", "Last Slot"];

const SYSTEM_SHEET_ROWS: usize = 1000;

/// Schedule sheet columns: canonical name first, then legacy labels.
const SCHEDULE_BLOCK: &[&str] = &["Block", "Block_Name"];
const SCHEDULE_TYPE: &[&str] = &["Type", "Loai_Lich"];
const SCHEDULE_PRIMARY: &[&str] = &["Primary", "Thong_So_Chinh"];
const SCHEDULE_SECONDARY: &[&str] = &["Secondary", "Thong_So_Phu"];

/// Jobs read from the job sheet, with the column layout they were read with.
#[derive(Debug, Clone)]
pub struct JobSheet {
    /// Located columns.
    pub columns: JobColumns,
    /// Every job with a source link, in sheet order.
    pub jobs: Vec<SyncJob>,
}

impl JobSheet {
    /// Pending jobs of `block`, in sheet order.
    #[must_use]
    pub fn block(&self, block: &str) -> Vec<SyncJob> {
        let block = block.trim();
        self.jobs
            .iter()
            .filter(|job| job.block_name.trim() == block && job.is_eligible())
            .cloned()
            .collect()
    }

    /// The job at sheet row `row_number`.
    #[must_use]
    pub fn row(&self, row_number: usize) -> Option<&SyncJob> {
        self.jobs.iter().find(|job| job.row_number == row_number)
    }
}

/// Reads and writes the master workbook.
#[derive(Clone)]
pub struct JobStore {
    provider: Arc<dyn SpreadsheetProvider>,
    master: DocumentId,
    sheets: SheetTitles,
    retry: RetryPolicy,
    timezone: Tz,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("master", &self.master)
            .field("sheets", &self.sheets)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Creates a store over the master workbook `master`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SpreadsheetProvider>,
        master: DocumentId,
        config: &SyncConfig,
    ) -> Self {
        Self {
            provider,
            master,
            sheets: config.sheets.clone(),
            retry: config.retry.clone(),
            timezone: config.timezone,
        }
    }

    /// The master workbook.
    #[must_use]
    pub fn master(&self) -> &DocumentId {
        &self.master
    }

    async fn read_sheet(&self, sheet: &str) -> Result<Option<Vec<Vec<String>>>> {
        let provider = self.provider.as_ref();
        match with_retry(&self.retry, "read_all", || provider.read_all(&self.master, sheet)).await {
            Ok(rows) => Ok(Some(rows)),
            Err(e) if e.kind == ProviderErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from_read_failure(&self.master.to_link(), e)),
        }
    }

    /// Reads every job.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the job sheet is missing or lacks a
    /// required column, or the provider error once retries are exhausted.
    pub async fn load_jobs(&self) -> Result<JobSheet> {
        let title = &self.sheets.jobs;
        let Some(grid) = self.read_sheet(title).await? else {
            return Err(Error::configuration(format!("job sheet '{title}' not found")));
        };
        let Some((header, body)) = grid.split_first() else {
            return Ok(JobSheet {
                columns: JobColumns::default(),
                jobs: Vec::new(),
            });
        };

        let columns = JobColumns::locate(header);
        let missing = columns.missing_required();
        if !missing.is_empty() {
            return Err(Error::configuration(format!(
                "job sheet '{title}' is missing columns: {}",
                missing.join(", ")
            )));
        }

        let jobs: Vec<SyncJob> = body
            .iter()
            .enumerate()
            .filter_map(|(i, row)| columns.parse_row(i + 2, row))
            .collect();
        tracing::debug!(sheet = %title, jobs = jobs.len(), "loaded jobs");
        Ok(JobSheet { columns, jobs })
    }

    /// Reads schedule entries. Rows that do not parse are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the sheet lacks a block or type
    /// column, or the provider error once retries are exhausted.
    pub async fn load_schedule(&self) -> Result<Vec<ScheduleEntry>> {
        let title = &self.sheets.schedule;
        let Some(grid) = self.read_sheet(title).await? else {
            tracing::warn!(sheet = %title, "schedule sheet not found; nothing is scheduled");
            return Ok(Vec::new());
        };
        let Some((header, body)) = grid.split_first() else {
            return Ok(Vec::new());
        };

        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let (Some(block), Some(kind)) = (find(SCHEDULE_BLOCK), find(SCHEDULE_TYPE)) else {
            return Err(Error::configuration(format!(
                "schedule sheet '{title}' needs Block and Type columns"
            )));
        };
        let primary = find(SCHEDULE_PRIMARY);
        let secondary = find(SCHEDULE_SECONDARY);
        let cell = |row: &[String], i: Option<usize>| {
            i.and_then(|i| row.get(i)).map_or("", |c| c.trim()).to_string()
        };

        let mut entries = Vec::new();
        for (i, row) in body.iter().enumerate() {
            let name = cell(row, Some(block));
            if name.is_empty() {
                continue;
            }
            match ScheduleEntry::parse(
                &name,
                &cell(row, Some(kind)),
                &cell(row, primary),
                &cell(row, secondary),
            ) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    tracing::warn!(row = i + 2, block = %name, error = %error, "skipping schedule row");
                }
            }
        }
        Ok(entries)
    }

    /// Reads the last fired slot per block.
    ///
    /// A missing sheet is an empty ledger; unparsable rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn load_ledger(&self) -> Result<ScheduleLedger> {
        let mut ledger = ScheduleLedger::new();
        let Some(grid) = self.read_sheet(&self.sheets.schedule_state).await? else {
            return Ok(ledger);
        };
        for row in grid.iter().skip(1) {
            let (Some(block), Some(slot)) = (row.first(), row.get(1)) else {
                continue;
            };
            match DateTime::parse_from_rfc3339(slot.trim()) {
                Ok(slot) => ledger.record(block.trim(), slot.with_timezone(&Utc)),
                Err(error) => {
                    tracing::debug!(block = %block, slot = %slot, error = %error, "ignoring ledger row");
                }
            }
        }
        Ok(ledger)
    }

    /// Writes the ledger, updating known blocks in place and appending new ones.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn save_ledger(&self, ledger: &ScheduleLedger) -> Result<()> {
        let title = self.sheets.schedule_state.clone();
        self.ensure_sheet(&title, &SCHEDULE_STATE_HEADER).await?;
        let grid = self.read_sheet(&title).await?.unwrap_or_default();
        let provider = self.provider.as_ref();

        let mut appended = Vec::new();
        for (block, slot) in ledger.iter() {
            let values = vec![block.to_string(), slot.to_rfc3339()];
            let existing = grid
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, row)| row.first().is_some_and(|c| c.trim() == block));
            match existing {
                Some((_, row)) if row.get(1) == values.get(1) => {}
                Some((i, _)) => {
                    with_retry(&self.retry, "update_row", || {
                        provider.update_row(&self.master, &title, i + 1, 0, &values)
                    })
                    .await
                    .map_err(|e| Error::from_write_failure(&self.master.to_link(), e))?;
                }
                None => appended.push(values),
            }
        }
        if !appended.is_empty() {
            self.append(&title, &appended).await?;
        }
        Ok(())
    }

    /// Writes a job's result status and range back into its row.
    ///
    /// Missing result columns are skipped.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn write_result(&self, columns: &JobColumns, outcome: &JobOutcome) -> Result<()> {
        let row = outcome.job.row_number;
        if row < 2 {
            return Ok(());
        }
        let provider = self.provider.as_ref();
        let title = &self.sheets.jobs;
        for (column, value) in [
            (JobColumn::Result, outcome.result.status_text()),
            (JobColumn::ResultRange, outcome.result.range_text()),
        ] {
            let Some(col) = columns.position(column) else {
                tracing::debug!(column = column.canonical(), "job sheet has no result column");
                continue;
            };
            let values = [value];
            with_retry(&self.retry, "update_row", || {
                provider.update_row(&self.master, title, row, col, &values)
            })
            .await
            .map_err(|e| Error::from_write_failure(&self.master.to_link(), e))?;
        }
        Ok(())
    }

    /// Appends run log lines, creating the sheet if needed.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn append_run_log(&self, lines: &[RunLogLine]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let title = self.sheets.run_log.clone();
        self.ensure_sheet(&title, &RUN_LOG_HEADER).await?;
        let rows: Vec<Vec<String>> = lines.iter().map(|l| l.to_row(self.timezone)).collect();
        self.append(&title, &rows).await
    }

    /// Appends one audit entry, creating the sheet if needed.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let title = self.sheets.audit_log.clone();
        self.ensure_sheet(&title, &AUDIT_LOG_HEADER).await?;
        self.append(&title, &[entry.to_row(self.timezone)]).await
    }

    async fn append(&self, title: &str, rows: &[Vec<String>]) -> Result<()> {
        let provider = self.provider.as_ref();
        with_retry(&self.retry, "append_rows", || {
            provider.append_rows(&self.master, title, rows)
        })
        .await
        .map_err(|e| Error::from_write_failure(&self.master.to_link(), e))
    }

    /// Creates `title` with `header` unless it already exists.
    async fn ensure_sheet(&self, title: &str, header: &[&str]) -> Result<()> {
        let provider = self.provider.as_ref();
        let fail = |e| Error::from_write_failure(&self.master.to_link(), e);
        let titles = with_retry(&self.retry, "worksheet_titles", || {
            provider.worksheet_titles(&self.master)
        })
        .await
        .map_err(fail)?;
        if titles.iter().any(|t| t == title) {
            return Ok(());
        }

        with_retry(&self.retry, "add_worksheet", || {
            provider.add_worksheet(&self.master, title, SYSTEM_SHEET_ROWS, header.len())
        })
        .await
        .map_err(fail)?;
        let values: Vec<String> = header.iter().map(ToString::to_string).collect();
        with_retry(&self.retry, "update_row", || {
            provider.update_row(&self.master, title, 1, 0, &values)
        })
        .await
        .map_err(fail)?;
        tracing::info!(sheet = %title, "created system sheet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::job::{JobResult, JobStatus};
    use crate::provider::{MemoryProvider, RowSpan};
    use chrono::TimeZone;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn master() -> DocumentId {
        DocumentId::new("master").expect("doc id")
    }

    fn store(provider: &MemoryProvider) -> JobStore {
        JobStore::new(Arc::new(provider.clone()), master(), &SyncConfig::immediate())
    }

    fn seed_jobs(provider: &MemoryProvider) {
        provider.insert_sheet(
            &master(),
            "luu_cau_hinh",
            vec![
                s(&["Block_Name", "Trạng thái", "Tháng", "Link dữ liệu lấy dữ liệu", "Link dữ liệu đích", "Kết quả", "Dòng dữ liệu"]),
                s(&["A", "Chưa chốt & đang cập nhật", "05/2024", "https://h/d/src1/edit", "https://h/d/dst/edit", "", ""]),
                s(&["A", "Đã chốt", "04/2024", "https://h/d/src2/edit", "https://h/d/dst/edit", "", ""]),
                s(&["B", "Pending", "05/2024", "", "https://h/d/dst/edit", "", ""]),
                s(&["B", "Pending", "05/2024", "https://h/d/src3/edit", "https://h/d/dst/edit", "", ""]),
            ],
        );
    }

    #[tokio::test]
    async fn loads_jobs_with_legacy_headers() {
        let provider = MemoryProvider::new();
        seed_jobs(&provider);
        let sheet = store(&provider).load_jobs().await.expect("jobs");

        assert_eq!(sheet.jobs.len(), 3);
        assert_eq!(sheet.jobs[0].row_number, 2);
        assert_eq!(sheet.jobs[1].status, JobStatus::Finalized);
        assert_eq!(sheet.jobs[2].row_number, 5);

        let block_a = sheet.block("A");
        assert_eq!(block_a.len(), 1);
        assert_eq!(block_a[0].month, "05/2024");
        assert!(sheet.row(5).is_some());
    }

    #[tokio::test]
    async fn missing_required_column_is_configuration_error() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&master(), "luu_cau_hinh", vec![s(&["Block", "Status"])]);
        let err = store(&provider).load_jobs().await.expect_err("missing columns");
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("Source Link"));
    }

    #[tokio::test]
    async fn schedule_rows_that_fail_to_parse_are_skipped() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(
            &master(),
            "sys_config",
            vec![
                s(&["Block_Name", "Loai_Lich", "Thong_So_Chinh", "Thong_So_Phu"]),
                s(&["A", "Chạy theo phút", "50", ""]),
                s(&["B", "Hàng ngày", "25:99", ""]),
                s(&["", "daily", "08:00", ""]),
                s(&["C", "Hàng tuần", "08:00", "T2,CN"]),
            ],
        );
        let entries = store(&provider).load_schedule().await.expect("schedule");
        let names: Vec<&str> = entries.iter().map(|e| e.block_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn ledger_round_trips_through_sheet() {
        let provider = MemoryProvider::new();
        provider.insert_sheet(&master(), "luu_cau_hinh", Vec::new());
        let store = store(&provider);

        assert!(store.load_ledger().await.expect("empty").iter().next().is_none());

        let first = Utc.with_ymd_and_hms(2024, 5, 6, 1, 40, 0).single().expect("time");
        let mut ledger = ScheduleLedger::new();
        ledger.record("A", first);
        ledger.record("B", first);
        store.save_ledger(&ledger).await.expect("save");

        let later = first + chrono::TimeDelta::minutes(50);
        ledger.record("A", later);
        store.save_ledger(&ledger).await.expect("save again");

        let rows = provider
            .sheet_rows(&master(), "sys_schedule_state")
            .expect("state sheet");
        assert_eq!(rows.len(), 3, "one header plus one row per block");

        let loaded = store.load_ledger().await.expect("load");
        assert_eq!(loaded.last_fired("A"), Some(later));
        assert_eq!(loaded.last_fired("B"), Some(first));
    }

    #[tokio::test]
    async fn result_written_into_job_row() {
        let provider = MemoryProvider::new();
        seed_jobs(&provider);
        let store = store(&provider);
        let sheet = store.load_jobs().await.expect("jobs");

        let outcome = JobOutcome {
            job: sheet.jobs[0].clone(),
            result: JobResult::Success {
                rows: 3,
                range: Some(RowSpan::new(10, 12)),
            },
        };
        store.write_result(&sheet.columns, &outcome).await.expect("write");

        let rows = provider.sheet_rows(&master(), "luu_cau_hinh").expect("jobs");
        assert_eq!(rows[1][5], "Success");
        assert_eq!(rows[1][6], "10 - 12");
        assert_eq!(rows[2][5], "");
    }

    #[tokio::test]
    async fn log_sheets_created_on_first_append() {
        let provider = MemoryProvider::new();
        seed_jobs(&provider);
        let store = store(&provider);
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 1, 0, 0).single().expect("time");

        let entry = AuditEntry::run(at, "AUTO_BOT", AuditAction::ScheduledRun, &["A".into()]);
        store.append_audit(&entry).await.expect("audit");
        store.append_audit(&entry).await.expect("audit again");

        let rows = provider.sheet_rows(&master(), "log_hanh_vi").expect("audit sheet");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], s(&AUDIT_LOG_HEADER));
        assert_eq!(rows[2][3], "Blocks: A");
    }
}
