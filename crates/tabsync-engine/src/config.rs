//! Engine configuration.
//!
//! Every value has a default; [`SyncConfig::from_env`] overrides them from
//! `TABSYNC_*` environment variables.

use std::time::Duration;

use chrono_tz::Tz;
use tabsync_core::{DocumentId, Error as CoreError, HolderId, LogFormat};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Column names carrying the provenance key in destination sheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceColumns {
    /// Source link column.
    pub link: String,
    /// Source sheet column.
    pub sheet: String,
    /// Month column.
    pub month: String,
}

impl Default for ProvenanceColumns {
    fn default() -> Self {
        Self {
            link: "Source Link".to_string(),
            sheet: "Source Sheet".to_string(),
            month: "Month".to_string(),
        }
    }
}

impl ProvenanceColumns {
    /// Parses three comma-separated names.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly three distinct non-empty names are given.
    pub fn parse(value: &str) -> Result<Self> {
        let names: Vec<&str> = value.split(',').map(str::trim).collect();
        let [link, sheet, month] = names.as_slice() else {
            return Err(Error::configuration(format!(
                "provenance columns must be three comma-separated names (got '{value}')"
            )));
        };
        let columns = Self {
            link: (*link).to_string(),
            sheet: (*sheet).to_string(),
            month: (*month).to_string(),
        };
        columns.validate()?;
        Ok(columns)
    }

    /// The three names in key order.
    #[must_use]
    pub fn names(&self) -> [&str; 3] {
        [&self.link, &self.sheet, &self.month]
    }

    /// Returns true if `name` is one of the provenance columns.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(&name)
    }

    fn validate(&self) -> Result<()> {
        let [link, sheet, month] = self.names();
        if link.is_empty() || sheet.is_empty() || month.is_empty() {
            return Err(Error::configuration("provenance column names must not be empty"));
        }
        if link == sheet || link == month || sheet == month {
            return Err(Error::configuration("provenance column names must be distinct"));
        }
        Ok(())
    }
}

/// Titles of the master workbook's system sheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTitles {
    /// Job configuration.
    pub jobs: String,
    /// Schedule entries.
    pub schedule: String,
    /// Last fired slot per block.
    pub schedule_state: String,
    /// Run lease cells.
    pub lease: String,
    /// One line per job per run.
    pub run_log: String,
    /// One line per run.
    pub audit_log: String,
}

impl Default for SheetTitles {
    fn default() -> Self {
        Self {
            jobs: "luu_cau_hinh".to_string(),
            schedule: "sys_config".to_string(),
            schedule_state: "sys_schedule_state".to_string(),
            lease: "sys_lock".to_string(),
            run_log: "log_lanthucthi".to_string(),
            audit_log: "log_hanh_vi".to_string(),
        }
    }
}

/// Configuration for [`crate::engine::SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master workbook holding jobs, schedule, lease and logs.
    pub master_sheet: Option<DocumentId>,
    /// Time zone schedules are evaluated in.
    pub timezone: Tz,
    /// How far back a trigger still recognises a boundary.
    pub lookback_minutes: u32,
    /// Floor for interval schedules.
    pub min_interval_minutes: u32,
    /// Age after which a lease may be reclaimed.
    pub lease_ttl: Duration,
    /// Identity written into the lease.
    pub holder_id: HolderId,
    /// Pause between source fetches.
    pub fetch_pacing: Duration,
    /// Pause between delete batches and append chunks.
    pub batch_pause: Duration,
    /// Row spans per delete request.
    pub delete_batch_size: usize,
    /// Rows per append request.
    pub append_chunk_size: usize,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Destination sheet used when a job names none.
    pub default_destination_sheet: String,
    /// Provenance column names.
    pub provenance: ProvenanceColumns,
    /// Actor recorded in logs.
    pub actor: String,
    /// System sheet titles.
    pub sheets: SheetTitles,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            master_sheet: None,
            timezone: chrono_tz::Asia::Ho_Chi_Minh,
            lookback_minutes: 18,
            min_interval_minutes: 30,
            lease_ttl: tabsync_core::DEFAULT_LEASE_TTL,
            holder_id: HolderId::generate("tabsync"),
            fetch_pacing: Duration::from_millis(1500),
            batch_pause: Duration::from_secs(1),
            delete_batch_size: 100,
            append_chunk_size: 5000,
            retry: RetryPolicy::default(),
            default_destination_sheet: "Tong_Hop_Data".to_string(),
            provenance: ProvenanceColumns::default(),
            actor: "AUTO_BOT".to_string(),
            sheets: SheetTitles::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl SyncConfig {
    /// A configuration with every pause and retry delay set to zero.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            fetch_pacing: Duration::ZERO,
            batch_pause: Duration::ZERO,
            retry: RetryPolicy::immediate(3),
            ..Self::default()
        }
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or the
    /// result fails [`SyncConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(master) = env
            .string("TABSYNC_MASTER_SHEET")
            .or_else(|| env.string("HISTORY_SHEET_ID"))
        {
            config.master_sheet = Some(DocumentId::from_link_or_id(&master)?);
        }
        if let Some(tz) = env.string("TABSYNC_TIMEZONE") {
            config.timezone = tz.parse::<Tz>().map_err(|e| {
                CoreError::InvalidInput(format!("TABSYNC_TIMEZONE must be an IANA zone: {e}"))
            })?;
        }
        if let Some(v) = env.u32("TABSYNC_LOOKBACK_MINUTES")? {
            config.lookback_minutes = v;
        }
        if let Some(v) = env.u32("TABSYNC_MIN_INTERVAL_MINUTES")? {
            config.min_interval_minutes = v;
        }
        if let Some(v) = env.u64("TABSYNC_LEASE_TTL_SECS")? {
            config.lease_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env.string("TABSYNC_HOLDER_ID") {
            config.holder_id = HolderId::new(v);
        }
        if let Some(v) = env.u64("TABSYNC_FETCH_PACING_MS")? {
            config.fetch_pacing = Duration::from_millis(v);
        }
        if let Some(v) = env.u64("TABSYNC_BATCH_PAUSE_MS")? {
            config.batch_pause = Duration::from_millis(v);
        }
        if let Some(v) = env.usize("TABSYNC_DELETE_BATCH_SIZE")? {
            config.delete_batch_size = v;
        }
        if let Some(v) = env.usize("TABSYNC_APPEND_CHUNK_SIZE")? {
            config.append_chunk_size = v;
        }
        if let Some(v) = env.u32("TABSYNC_MAX_RETRIES")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = env.u64("TABSYNC_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env.u64("TABSYNC_RETRY_FLOOR_MS")? {
            config.retry.rate_limit_floor = Duration::from_millis(v);
        }
        if let Some(v) = env.string("TABSYNC_DEFAULT_DEST_SHEET") {
            config.default_destination_sheet = v;
        }
        if let Some(v) = env.string("TABSYNC_PROVENANCE_COLUMNS") {
            config.provenance = ProvenanceColumns::parse(&v)?;
        }
        if let Some(v) = env.string("TABSYNC_ACTOR") {
            config.actor = v;
        }
        if let Some(v) = env.string("TABSYNC_LOG_FORMAT") {
            config.log_format = v.parse()?;
        }

        let sheets = &mut config.sheets;
        for (name, slot) in [
            ("TABSYNC_SHEET_JOBS", &mut sheets.jobs),
            ("TABSYNC_SHEET_SCHEDULE", &mut sheets.schedule),
            ("TABSYNC_SHEET_SCHEDULE_STATE", &mut sheets.schedule_state),
            ("TABSYNC_SHEET_LEASE", &mut sheets.lease),
            ("TABSYNC_SHEET_RUN_LOG", &mut sheets.run_log),
            ("TABSYNC_SHEET_AUDIT_LOG", &mut sheets.audit_log),
        ] {
            if let Some(v) = env.string(name) {
                *slot = v;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks sizes and durations.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.delete_batch_size == 0 {
            return Err(Error::configuration("delete batch size must be positive"));
        }
        if self.append_chunk_size == 0 {
            return Err(Error::configuration("append chunk size must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::configuration("max retries must be positive"));
        }
        if self.lease_ttl < Duration::from_secs(60) {
            return Err(Error::configuration("lease TTL must be at least 60 seconds"));
        }
        if self.min_interval_minutes == 0 {
            return Err(Error::configuration("minimum interval must be positive"));
        }
        if self.default_destination_sheet.trim().is_empty() {
            return Err(Error::configuration("default destination sheet must not be empty"));
        }
        self.provenance.validate()
    }

    /// The master workbook, or a configuration error if unset.
    ///
    /// # Errors
    ///
    /// Returns an error if no master workbook is configured.
    pub fn require_master_sheet(&self) -> Result<&DocumentId> {
        self.master_sheet.as_ref().ok_or_else(|| {
            Error::configuration("master workbook not set (TABSYNC_MASTER_SHEET or HISTORY_SHEET_ID)")
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parsed<T>(&self, name: &str, kind: &str) -> tabsync_core::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<T>()
            .map(Some)
            .map_err(|e| CoreError::InvalidInput(format!("{name} must be a {kind}: {e}")))
    }

    fn u32(&self, name: &str) -> tabsync_core::Result<Option<u32>> {
        self.parsed(name, "u32")
    }

    fn u64(&self, name: &str) -> tabsync_core::Result<Option<u64>> {
        self.parsed(name, "u64")
    }

    fn usize(&self, name: &str) -> tabsync_core::Result<Option<usize>> {
        self.parsed(name, "usize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.lookback_minutes, 18);
        assert_eq!(config.min_interval_minutes, 30);
        assert_eq!(config.timezone, chrono_tz::Asia::Ho_Chi_Minh);
        assert_eq!(config.sheets.jobs, "luu_cau_hinh");
        assert!(config.master_sheet.is_none());
    }

    #[test]
    fn legacy_master_sheet_accepts_url() {
        let config = SyncConfig::from_lookup(lookup(&[(
            "HISTORY_SHEET_ID",
            "https://docs.google.com/spreadsheets/d/1AbC-xyz_9/edit#gid=0",
        )]))
        .expect("config");
        assert_eq!(
            config.master_sheet.expect("master").as_str(),
            "1AbC-xyz_9"
        );
    }

    #[test]
    fn overrides_apply() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TABSYNC_MASTER_SHEET", "masterid"),
            ("HISTORY_SHEET_ID", "ignored"),
            ("TABSYNC_TIMEZONE", "UTC"),
            ("TABSYNC_LOOKBACK_MINUTES", " 20 "),
            ("TABSYNC_APPEND_CHUNK_SIZE", "10"),
            ("TABSYNC_PROVENANCE_COLUMNS", "Link file nguồn, Sheet nguồn, Tháng"),
            ("TABSYNC_SHEET_RUN_LOG", "runs"),
            ("TABSYNC_LOG_FORMAT", "json"),
            ("TABSYNC_ACTOR", ""),
        ]))
        .expect("config");
        assert_eq!(config.master_sheet.expect("master").as_str(), "masterid");
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.lookback_minutes, 20);
        assert_eq!(config.append_chunk_size, 10);
        assert_eq!(config.provenance.sheet, "Sheet nguồn");
        assert_eq!(config.sheets.run_log, "runs");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.actor, "AUTO_BOT");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("TABSYNC_MAX_RETRIES", "many")]))
            .expect_err("invalid");
        assert!(err.to_string().contains("TABSYNC_MAX_RETRIES"));
    }

    #[test]
    fn zero_sizes_fail_validation() {
        let err = SyncConfig::from_lookup(lookup(&[("TABSYNC_DELETE_BATCH_SIZE", "0")]))
            .expect_err("invalid");
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn provenance_columns_need_three_distinct_names() {
        assert!(ProvenanceColumns::parse("a,b").is_err());
        assert!(ProvenanceColumns::parse("a,b,a").is_err());
        let columns = ProvenanceColumns::parse("a, b ,c").expect("three names");
        assert!(columns.contains("b"));
    }
}
