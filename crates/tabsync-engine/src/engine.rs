//! Run orchestration.
//!
//! A run selects jobs (due schedule blocks, or one block on request), takes
//! the run lease, groups the jobs by destination and processes the groups in
//! order:
//!
//! 1. Preflight the destination link and access
//! 2. Fetch every job's source, pacing between fetches
//! 3. Reconcile the fetched datasets into the destination
//!
//! Results are written back into the job rows, then the run log and audit
//! entries are appended. Reporting failures are logged and never fail the run.
//! The lease is released on every exit path once acquired.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabsync_core::observability::{group_span, run_span};
use tabsync_core::{DocumentId, LeaseManager, LeaseRecord, LeaseStore, RunId};
use tracing::Instrument;

use crate::audit::{AuditAction, AuditEntry};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::{FetchRequest, SourceDataset, SourceFetcher};
use crate::job::{JobOutcome, JobResult, SyncJob};
use crate::metrics::{SyncMetrics, TimingGuard};
use crate::reconcile::DestinationReconciler;
use crate::retry::with_retry;
use crate::run_log::RunLogLine;
use crate::schedule::{DueBlock, Scheduler};
use crate::sheet_lease::SheetLeaseStore;
use crate::store::{JobSheet, JobStore};

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Due schedule blocks.
    Scheduled,
    /// One block on request.
    Manual,
}

impl Trigger {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    const fn audit_action(self) -> AuditAction {
        match self {
            Self::Scheduled => AuditAction::ScheduledRun,
            Self::Manual => AuditAction::ManualRun,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// How the run was started.
    pub trigger: Trigger,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Blocks the run covered.
    pub blocks: Vec<DueBlock>,
    /// One outcome per job, in job sheet order within each block.
    pub outcomes: Vec<JobOutcome>,
}

impl RunReport {
    fn new(trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::generate(),
            trigger,
            started_at,
            blocks: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Jobs that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_success()).count()
    }

    /// Jobs that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Rows appended across all jobs.
    #[must_use]
    pub fn rows_appended(&self) -> usize {
        self.outcomes.iter().map(|o| o.result.rows()).sum()
    }
}

/// The sync engine.
pub struct SyncEngine {
    provider: Arc<dyn crate::provider::SpreadsheetProvider>,
    config: SyncConfig,
    store: JobStore,
    leases: LeaseManager<dyn LeaseStore>,
    metrics: SyncMetrics,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("holder", &self.config.holder_id)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine over `provider`, with the lease kept in the master
    /// workbook.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no master workbook is configured.
    pub fn new(
        provider: Arc<dyn crate::provider::SpreadsheetProvider>,
        config: SyncConfig,
    ) -> Result<Self> {
        let master = config.require_master_sheet()?.clone();
        let lease_store: Arc<dyn LeaseStore> = Arc::new(SheetLeaseStore::new(
            Arc::clone(&provider),
            master.clone(),
            config.sheets.lease.clone(),
            config.retry.clone(),
        ));
        let store = JobStore::new(Arc::clone(&provider), master, &config);
        Ok(Self {
            leases: LeaseManager::new(lease_store, config.lease_ttl),
            provider,
            config,
            store,
            metrics: SyncMetrics::new(),
        })
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The master workbook store.
    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Blocks due at `now`, without running them or recording anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule or its state cannot be read.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DueBlock>> {
        let entries = self.store.load_schedule().await?;
        let ledger = self.store.load_ledger().await?;
        let scheduler = Scheduler::new(
            self.config.timezone,
            self.config.lookback_minutes,
            self.config.min_interval_minutes,
        );
        Ok(scheduler.due_blocks(&entries, &ledger, now))
    }

    /// Runs every block due at `now`.
    ///
    /// `now` only selects the due blocks; the lease is always stamped and
    /// aged by the wall clock. Returns an empty report without taking the
    /// lease when nothing is due.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockContention`] if another holder owns the lease,
    /// or an error if configuration storage cannot be read. Per-job failures
    /// are reported in the returned [`RunReport`].
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport::new(Trigger::Scheduled, now);
        let span = run_span(&report.run_id.to_string(), Trigger::Scheduled.as_str());
        self.scheduled(&mut report).instrument(span).await?;
        Ok(report)
    }

    async fn scheduled(&self, report: &mut RunReport) -> Result<()> {
        let now = report.started_at;
        report.blocks = self.due(now).await?;
        if report.blocks.is_empty() {
            tracing::info!("no blocks due");
            return Ok(());
        }
        for block in &report.blocks {
            tracing::info!(block = %block, "block due");
            self.metrics.record_schedule_fire(block.schedule);
        }

        let guard = self.acquire().await?;
        let result = self.run_due_blocks(report).await;
        if let Err(error) = guard.release().await {
            tracing::warn!(error = %error, "failed to release run lease");
        }
        result
    }

    async fn run_due_blocks(&self, report: &mut RunReport) -> Result<()> {
        let names: Vec<String> = report.blocks.iter().map(|b| b.block_name.clone()).collect();
        let outcomes = self.execute(report, &names).await?;
        report.outcomes = outcomes;

        // Recorded only once the lease is held, so a busy run does not
        // consume the slot.
        let mut ledger = self.store.load_ledger().await?;
        for block in &report.blocks {
            ledger.record(&block.block_name, block.slot);
        }
        if let Err(error) = self.store.save_ledger(&ledger).await {
            tracing::error!(error = %error, "failed to save schedule state");
        }
        Ok(())
    }

    /// Runs one block now, ignoring its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockContention`] if another holder owns the lease,
    /// or an error if the job sheet cannot be read.
    pub async fn run_block(&self, block: &str, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport::new(Trigger::Manual, now);
        report.blocks.push(DueBlock {
            block_name: block.trim().to_string(),
            slot: now,
            schedule: "manual",
        });
        let span = run_span(&report.run_id.to_string(), Trigger::Manual.as_str());
        self.manual(&mut report).instrument(span).await?;
        Ok(report)
    }

    async fn manual(&self, report: &mut RunReport) -> Result<()> {
        let names: Vec<String> = report.blocks.iter().map(|b| b.block_name.clone()).collect();
        let guard = self.acquire().await?;
        let result = self.execute(report, &names).await;
        if let Err(error) = guard.release().await {
            tracing::warn!(error = %error, "failed to release run lease");
        }
        report.outcomes = result?;
        Ok(())
    }

    async fn acquire(&self) -> Result<tabsync_core::LeaseGuard<dyn LeaseStore>> {
        match self.leases.acquire(&self.config.holder_id).await {
            Ok(guard) => Ok(guard),
            Err(error) => {
                if error.is_lease_held() {
                    self.metrics.record_lease_contention();
                    tracing::warn!(error = %error, "system busy; run skipped");
                }
                Err(error.into())
            }
        }
    }

    /// Loads the blocks' pending jobs, syncs them and reports the results.
    async fn execute(&self, report: &RunReport, blocks: &[String]) -> Result<Vec<JobOutcome>> {
        let started = Instant::now();
        let trigger = report.trigger.as_str();
        let metrics = self.metrics;
        let _timer = TimingGuard::new(move |elapsed| metrics.observe_run_duration(trigger, elapsed));

        let sheet = self.store.load_jobs().await?;
        let mut jobs = Vec::new();
        for block in blocks {
            let block_jobs = sheet.block(block);
            if block_jobs.is_empty() {
                tracing::warn!(block = %block, "block has no pending jobs");
            }
            jobs.extend(block_jobs);
        }

        let outcomes = self.sync_jobs(&jobs).await;
        self.report(report, &sheet, blocks, &outcomes).await;
        tracing::info!(
            jobs = outcomes.len(),
            succeeded = outcomes.iter().filter(|o| o.result.is_success()).count(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "run finished"
        );
        Ok(outcomes)
    }

    /// Fetches and reconciles `jobs`, without touching the lease or the
    /// master workbook.
    ///
    /// Jobs are grouped by destination in first-seen order; outcomes are
    /// returned in input order.
    pub async fn sync_jobs(&self, jobs: &[SyncJob]) -> Vec<JobOutcome> {
        let mut groups: Vec<((String, String), Vec<usize>)> = Vec::new();
        for (i, job) in jobs.iter().enumerate() {
            let key = job.destination_key();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(i),
                None => groups.push((key, vec![i])),
            }
        }

        let mut results: Vec<Option<JobResult>> = vec![None; jobs.len()];
        let mut remaining = groups.len();
        for ((link, sheet), members) in &groups {
            self.metrics.set_groups_in_flight(remaining);
            let group: Vec<&SyncJob> = members.iter().map(|&i| &jobs[i]).collect();
            let span = group_span(&destination_label(link), sheet);
            let group_results = self.sync_group(link, sheet, &group).instrument(span).await;
            for (&i, result) in members.iter().zip(group_results) {
                self.metrics.record_job_outcome(result.metric_label());
                results[i] = Some(result);
            }
            remaining -= 1;
        }
        self.metrics.set_groups_in_flight(0);

        jobs.iter()
            .zip(results)
            .map(|(job, result)| JobOutcome {
                job: job.clone(),
                result: result.unwrap_or_else(|| JobResult::WriteFailed {
                    reason: "job was not processed".to_string(),
                }),
            })
            .collect()
    }

    async fn sync_group(&self, link: &str, sheet: &str, jobs: &[&SyncJob]) -> Vec<JobResult> {
        let reconciler = DestinationReconciler::new(self.provider.as_ref(), &self.config);
        let doc = match reconciler.preflight(link).await {
            Ok(doc) => doc,
            Err(error) => {
                tracing::warn!(error = %error, jobs = jobs.len(), "destination preflight failed");
                self.metrics.record_failure(error.category());
                let reason = error.to_string();
                return jobs
                    .iter()
                    .map(|_| JobResult::WriteFailed {
                        reason: reason.clone(),
                    })
                    .collect();
            }
        };

        let destination_headers = if jobs.iter().any(|j| j.source_headerless) {
            self.destination_header(&doc, sheet).await
        } else {
            None
        };

        let fetcher = SourceFetcher::new(
            self.provider.as_ref(),
            &self.config.retry,
            &self.config.provenance,
        );
        let mut results: Vec<Option<JobResult>> = vec![None; jobs.len()];
        let mut fetched: Vec<usize> = Vec::new();
        let mut datasets: Vec<SourceDataset> = Vec::new();
        for (i, job) in jobs.iter().enumerate() {
            if i > 0 && !self.config.fetch_pacing.is_zero() {
                tokio::time::sleep(self.config.fetch_pacing).await;
            }
            let mut request = FetchRequest::new(job);
            if let Some(headers) = destination_headers.as_deref() {
                request = request.with_destination_headers(headers);
            }
            match fetcher.fetch(request).await {
                Ok(dataset) => {
                    tracing::debug!(row = job.row_number, rows = dataset.len(), "fetched source");
                    fetched.push(i);
                    datasets.push(dataset);
                }
                Err(error) => {
                    tracing::warn!(row = job.row_number, error = %error, "source fetch failed");
                    self.metrics.record_failure(error.category());
                    results[i] = Some(JobResult::FetchFailed {
                        reason: error.to_string(),
                    });
                }
            }
        }

        let report = reconciler.reconcile(link, sheet, &datasets).await;
        for (i, result) in fetched.into_iter().zip(report.results) {
            results[i] = Some(result);
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| JobResult::WriteFailed {
                    reason: "no result recorded".to_string(),
                })
            })
            .collect()
    }

    /// Header row of the destination sheet, if it exists and is readable.
    async fn destination_header(&self, doc: &DocumentId, sheet: &str) -> Option<Vec<String>> {
        let sheet = if sheet.is_empty() {
            self.config.default_destination_sheet.as_str()
        } else {
            sheet
        };
        let provider = self.provider.as_ref();
        match with_retry(&self.config.retry, "read_row", || provider.read_row(doc, sheet, 1)).await
        {
            Ok(header) if !header.is_empty() => Some(header),
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(sheet = %sheet, error = %error, "destination header unavailable");
                None
            }
        }
    }

    /// Writes results back and appends the run log and audit entries.
    async fn report(
        &self,
        report: &RunReport,
        sheet: &JobSheet,
        blocks: &[String],
        outcomes: &[JobOutcome],
    ) {
        for outcome in outcomes {
            if let Err(error) = self.store.write_result(&sheet.columns, outcome).await {
                tracing::warn!(
                    row = outcome.job.row_number,
                    error = %error,
                    "failed to write job result"
                );
            }
        }

        let actor = &self.config.actor;
        let lines: Vec<RunLogLine> = outcomes
            .iter()
            .map(|o| RunLogLine::from_outcome(report.started_at, actor, o))
            .collect();
        if let Err(error) = self.store.append_run_log(&lines).await {
            tracing::warn!(error = %error, "failed to append run log");
        }

        let entry = AuditEntry::run(
            report.started_at,
            actor,
            report.trigger.audit_action(),
            blocks,
        );
        if let Err(error) = self.store.append_audit(&entry).await {
            tracing::warn!(error = %error, "failed to append audit entry");
        }
    }

    /// Fetches the job at `row` of the job sheet without writing anything.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no job sits at `row`, or the fetch
    /// error.
    pub async fn preview(&self, row: usize) -> Result<SourceDataset> {
        let sheet = self.store.load_jobs().await?;
        let job = sheet
            .row(row)
            .ok_or_else(|| Error::configuration(format!("no job at row {row}")))?;

        let destination_headers = if job.source_headerless {
            match DocumentId::from_link(&job.destination_link) {
                Ok(doc) => self.destination_header(&doc, job.destination_sheet.trim()).await,
                Err(_) => None,
            }
        } else {
            None
        };
        let fetcher = SourceFetcher::new(
            self.provider.as_ref(),
            &self.config.retry,
            &self.config.provenance,
        );
        let mut request = FetchRequest::new(job);
        if let Some(headers) = destination_headers.as_deref() {
            request = request.with_destination_headers(headers);
        }
        fetcher.fetch(request).await
    }

    /// Reads the lease without acquiring it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be read.
    pub async fn lease_status(&self) -> Result<Option<LeaseRecord>> {
        Ok(self.leases.status().await?)
    }

    /// Clears the lease regardless of holder and audits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be written.
    pub async fn break_lease(&self, now: DateTime<Utc>) -> Result<()> {
        let previous = self.leases.status().await?;
        self.leases.force_break().await?;
        let holder = previous.map(|r| r.holder_id).unwrap_or_default();
        let entry = AuditEntry {
            at: now,
            actor: self.config.actor.clone(),
            action: AuditAction::LeaseBroken,
            detail: format!("Previous holder: {holder}"),
        };
        if let Err(error) = self.store.append_audit(&entry).await {
            tracing::warn!(error = %error, "failed to append audit entry");
        }
        Ok(())
    }
}

/// Document id for logs; links are never logged whole.
fn destination_label(link: &str) -> String {
    DocumentId::from_link(link).map_or_else(|_| "<invalid link>".to_string(), |doc| doc.to_string())
}
