//! Sync engine metrics.
//!
//! Recorded through the `metrics` facade; install any recorder (Prometheus,
//! statsd) in the hosting binary to export them.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tabsync_jobs_total` | Counter | `status` |
//! | `tabsync_failures_total` | Counter | `category` |
//! | `tabsync_rows_appended_total` | Counter | - |
//! | `tabsync_rows_deleted_total` | Counter | - |
//! | `tabsync_provider_retries_total` | Counter | `operation`, `kind` |
//! | `tabsync_lease_contention_total` | Counter | - |
//! | `tabsync_schedule_fires_total` | Counter | `schedule` |
//! | `tabsync_run_duration_seconds` | Histogram | `trigger` |
//! | `tabsync_groups_in_flight` | Gauge | - |
//!
//! ```rust,no_run
//! use tabsync_engine::metrics::{SyncMetrics, TimingGuard};
//!
//! let metrics = SyncMetrics::new();
//! {
//!     let _timer = TimingGuard::new(|d| metrics.observe_run_duration("manual", d));
//!     metrics.record_job_outcome("success");
//! }
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Counter: job outcomes.
    pub const JOBS_TOTAL: &str = "tabsync_jobs_total";
    /// Counter: typed failures seen while syncing a group.
    pub const FAILURES_TOTAL: &str = "tabsync_failures_total";
    /// Counter: rows appended to destinations.
    pub const ROWS_APPENDED_TOTAL: &str = "tabsync_rows_appended_total";
    /// Counter: stale rows deleted from destinations.
    pub const ROWS_DELETED_TOTAL: &str = "tabsync_rows_deleted_total";
    /// Counter: retried provider calls.
    pub const PROVIDER_RETRIES_TOTAL: &str = "tabsync_provider_retries_total";
    /// Counter: runs refused because the lease was held.
    pub const LEASE_CONTENTION_TOTAL: &str = "tabsync_lease_contention_total";
    /// Counter: schedule entries that fired.
    pub const SCHEDULE_FIRES_TOTAL: &str = "tabsync_schedule_fires_total";
    /// Histogram: run duration in seconds.
    pub const RUN_DURATION_SECONDS: &str = "tabsync_run_duration_seconds";
    /// Gauge: destination groups being written.
    pub const GROUPS_IN_FLIGHT: &str = "tabsync_groups_in_flight";
}

/// Label keys.
pub mod labels {
    /// Job outcome (success, fetch_failed, write_failed).
    pub const STATUS: &str = "status";
    /// Error category, see [`crate::Error::category`].
    pub const CATEGORY: &str = "category";
    /// Provider operation name.
    pub const OPERATION: &str = "operation";
    /// Provider error kind.
    pub const KIND: &str = "kind";
    /// Schedule type.
    pub const SCHEDULE: &str = "schedule";
    /// Run trigger (scheduled, manual).
    pub const TRIGGER: &str = "trigger";
}

/// Records sync metrics with consistent names and labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncMetrics;

impl SyncMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts one finished job.
    pub fn record_job_outcome(&self, status: &'static str) {
        counter!(names::JOBS_TOTAL, labels::STATUS => status).increment(1);
    }

    /// Counts one failure by its error category.
    pub fn record_failure(&self, category: &'static str) {
        counter!(names::FAILURES_TOTAL, labels::CATEGORY => category).increment(1);
    }

    /// Counts rows appended to a destination.
    pub fn record_rows_appended(&self, rows: usize) {
        counter!(names::ROWS_APPENDED_TOTAL).increment(rows as u64);
    }

    /// Counts stale rows deleted from a destination.
    pub fn record_rows_deleted(&self, rows: usize) {
        counter!(names::ROWS_DELETED_TOTAL).increment(rows as u64);
    }

    /// Counts a retried provider call.
    pub fn record_provider_retry(&self, operation: &str, kind: &'static str) {
        counter!(
            names::PROVIDER_RETRIES_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::KIND => kind,
        )
        .increment(1);
    }

    /// Counts a run refused by a held lease.
    pub fn record_lease_contention(&self) {
        counter!(names::LEASE_CONTENTION_TOTAL).increment(1);
    }

    /// Counts a schedule entry that fired.
    pub fn record_schedule_fire(&self, schedule: &'static str) {
        counter!(names::SCHEDULE_FIRES_TOTAL, labels::SCHEDULE => schedule).increment(1);
    }

    /// Records the duration of a run.
    pub fn observe_run_duration(&self, trigger: &'static str, duration: Duration) {
        histogram!(names::RUN_DURATION_SECONDS, labels::TRIGGER => trigger)
            .record(duration.as_secs_f64());
    }

    /// Sets the number of groups currently being written.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_groups_in_flight(&self, count: usize) {
        gauge!(names::GROUPS_IN_FLIGHT).set(count as f64);
    }
}

/// Calls `on_drop` with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Starts timing.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Recorder that keeps the name and labels of every counter increment.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CounterCapture {
    seen: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

#[cfg(test)]
impl CounterCapture {
    /// Label values of `label` on every increment of counter `name`.
    pub(crate) fn label_values(&self, name: &str, label: &str) -> Vec<String> {
        self.seen
            .lock()
            .expect("capture lock")
            .iter()
            .filter(|(n, _)| n == name)
            .filter_map(|(_, labels)| {
                labels.iter().find(|(k, _)| k == label).map(|(_, v)| v.clone())
            })
            .collect()
    }
}

#[cfg(test)]
struct CapturedCounter {
    name: String,
    labels: Vec<(String, String)>,
    seen: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

#[cfg(test)]
impl metrics::CounterFn for CapturedCounter {
    fn increment(&self, _value: u64) {
        self.seen
            .lock()
            .expect("capture lock")
            .push((self.name.clone(), self.labels.clone()));
    }

    fn absolute(&self, _value: u64) {}
}

#[cfg(test)]
impl metrics::Recorder for CounterCapture {
    fn describe_counter(
        &self,
        _: metrics::KeyName,
        _: Option<metrics::Unit>,
        _: metrics::SharedString,
    ) {
    }

    fn describe_gauge(
        &self,
        _: metrics::KeyName,
        _: Option<metrics::Unit>,
        _: metrics::SharedString,
    ) {
    }

    fn describe_histogram(
        &self,
        _: metrics::KeyName,
        _: Option<metrics::Unit>,
        _: metrics::SharedString,
    ) {
    }

    fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
        let labels = key
            .labels()
            .map(|l| (l.key().to_string(), l.value().to_string()))
            .collect();
        metrics::Counter::from_arc(std::sync::Arc::new(CapturedCounter {
            name: key.name().to_string(),
            labels,
            seen: std::sync::Arc::clone(&self.seen),
        }))
    }

    fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
        metrics::Gauge::noop()
    }

    fn register_histogram(
        &self,
        _: &metrics::Key,
        _: &metrics::Metadata<'_>,
    ) -> metrics::Histogram {
        metrics::Histogram::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn failure_is_labelled_by_category() {
        let capture = CounterCapture::default();
        metrics::with_local_recorder(&capture, || {
            let metrics = SyncMetrics::new();
            metrics.record_failure(crate::Error::filter("x", "bad").category());
            metrics.record_job_outcome("success");
        });
        assert_eq!(
            capture.label_values(names::FAILURES_TOTAL, labels::CATEGORY),
            vec!["filter_syntax".to_string()]
        );
    }

    #[test]
    fn timing_guard_fires_once_on_drop() {
        let recorded = Cell::new(None);
        {
            let guard = TimingGuard::new(|d| recorded.set(Some(d)));
            assert!(guard.elapsed() < Duration::from_secs(5));
        }
        assert!(recorded.get().is_some());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        let metrics = SyncMetrics::new();
        metrics.record_job_outcome("success");
        metrics.record_rows_appended(3);
        metrics.record_provider_retry("append_rows", "rate_limited");
        metrics.set_groups_in_flight(1);
    }
}
