//! Schedule evaluation.
//!
//! External triggers are coarse and jittery (a cron job that may start
//! minutes late), so an entry is due when its boundary fell inside a lookback
//! window ending now. Every due decision also names the boundary instant (the
//! *slot*) so a [`ScheduleLedger`] can stop two overlapping windows from
//! firing the same boundary twice.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// When a block runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Never.
    Disabled,
    /// Every `minutes` minutes, counted from midnight.
    IntervalMinutes {
        /// Interval length.
        minutes: u32,
    },
    /// Every day at `time`.
    Daily {
        /// Local time of day.
        time: NaiveTime,
    },
    /// On the listed weekdays at `time`.
    Weekly {
        /// Local time of day.
        time: NaiveTime,
        /// Days of the week.
        days: Vec<Weekday>,
    },
    /// On the listed days of the month at `time`.
    Monthly {
        /// Local time of day.
        time: NaiveTime,
        /// Days of the month (1-31).
        days: Vec<u32>,
    },
}

impl ScheduleKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::IntervalMinutes { .. } => "interval",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
        }
    }
}

/// One schedule row: a block and when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Block of jobs this entry triggers.
    pub block_name: String,
    /// Timing.
    pub kind: ScheduleKind,
}

impl ScheduleEntry {
    /// Parses a schedule row.
    ///
    /// `primary` is the time (`HH:MM`) or interval in minutes; `secondary` is
    /// the comma-separated weekday or day-of-month list.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown type or bad parameters.
    pub fn parse(block_name: &str, kind: &str, primary: &str, secondary: &str) -> Result<Self> {
        let bad = |what: &str| {
            Error::configuration(format!("schedule for block '{block_name}': {what}"))
        };
        let primary = primary.trim();
        let kind = match kind.trim().to_lowercase().as_str() {
            "" | "disabled" | "off" | "không chạy" => ScheduleKind::Disabled,
            "interval" | "minutes" | "chạy theo phút" => {
                let minutes = primary
                    .parse::<u32>()
                    .ok()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| bad(&format!("invalid interval '{primary}'")))?;
                ScheduleKind::IntervalMinutes { minutes }
            }
            "daily" | "hàng ngày" => ScheduleKind::Daily {
                time: parse_time(primary).ok_or_else(|| bad(&format!("invalid time '{primary}'")))?,
            },
            "weekly" | "hàng tuần" => ScheduleKind::Weekly {
                time: parse_time(primary).ok_or_else(|| bad(&format!("invalid time '{primary}'")))?,
                days: parse_list(secondary, parse_weekday)
                    .ok_or_else(|| bad(&format!("invalid weekdays '{secondary}'")))?,
            },
            "monthly" | "hàng tháng" => ScheduleKind::Monthly {
                time: parse_time(primary).ok_or_else(|| bad(&format!("invalid time '{primary}'")))?,
                days: parse_list(secondary, |d| d.parse::<u32>().ok().filter(|d| (1..=31).contains(d)))
                    .ok_or_else(|| bad(&format!("invalid days '{secondary}'")))?,
            },
            other => return Err(bad(&format!("unknown schedule type '{other}'"))),
        };
        Ok(Self {
            block_name: block_name.trim().to_string(),
            kind,
        })
    }

    /// The boundary that fell inside `(now - lookback, now]`, if any.
    ///
    /// Intervals shorter than `min_interval` minutes are raised to it.
    #[must_use]
    pub fn due_slot(
        &self,
        now: DateTime<Tz>,
        lookback_minutes: u32,
        min_interval: u32,
    ) -> Option<DateTime<Utc>> {
        let lookback = i64::from(lookback_minutes);
        match &self.kind {
            ScheduleKind::Disabled => None,
            ScheduleKind::IntervalMinutes { minutes } => {
                let interval = i64::from((*minutes).max(min_interval).max(1));
                let minute_of_day = i64::from(now.hour() * 60 + now.minute());
                let current = minute_of_day.div_euclid(interval);
                let previous = (minute_of_day - lookback).div_euclid(interval);
                if current <= previous {
                    return None;
                }
                let midnight = local_at(now, NaiveTime::from_hms_opt(0, 0, 0)?)?;
                Some(midnight + TimeDelta::minutes(current * interval))
            }
            ScheduleKind::Daily { time } => time_in_window(now, *time, lookback),
            ScheduleKind::Weekly { time, days } => {
                if days.contains(&now.weekday()) {
                    time_in_window(now, *time, lookback)
                } else {
                    None
                }
            }
            ScheduleKind::Monthly { time, days } => {
                if days.contains(&now.day()) {
                    time_in_window(now, *time, lookback)
                } else {
                    None
                }
            }
        }
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    NaiveTime::from_hms_opt(hour.trim().parse().ok()?, minute.trim().parse().ok()?, 0)
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.to_uppercase().as_str() {
        "T2" => Some(Weekday::Mon),
        "T3" => Some(Weekday::Tue),
        "T4" => Some(Weekday::Wed),
        "T5" => Some(Weekday::Thu),
        "T6" => Some(Weekday::Fri),
        "T7" => Some(Weekday::Sat),
        "CN" => Some(Weekday::Sun),
        _ => value.parse().ok(),
    }
}

/// Parses a comma-separated list; `None` if empty or any item is invalid.
fn parse_list<T>(value: &str, item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let items = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(item)
        .collect::<Option<Vec<T>>>()?;
    (!items.is_empty()).then_some(items)
}

fn local_at(now: DateTime<Tz>, time: NaiveTime) -> Option<DateTime<Utc>> {
    now.timezone()
        .from_local_datetime(&now.date_naive().and_time(time))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Today's `time` if `0 <= now - time <= lookback` minutes.
fn time_in_window(
    now: DateTime<Tz>,
    time: NaiveTime,
    lookback_minutes: i64,
) -> Option<DateTime<Utc>> {
    let slot = local_at(now, time)?;
    let elapsed = now.with_timezone(&Utc) - slot;
    let in_window = elapsed >= TimeDelta::zero() && elapsed <= TimeDelta::minutes(lookback_minutes);
    in_window.then_some(slot)
}

/// Last fired slot per block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLedger {
    last_fired: BTreeMap<String, DateTime<Utc>>,
}

impl ScheduleLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true unless `slot` (or a later one) already fired for `block`.
    #[must_use]
    pub fn should_fire(&self, block: &str, slot: DateTime<Utc>) -> bool {
        self.last_fired.get(block).is_none_or(|last| slot > *last)
    }

    /// Records that `slot` fired for `block`.
    pub fn record(&mut self, block: &str, slot: DateTime<Utc>) {
        let entry = self.last_fired.entry(block.to_string()).or_insert(slot);
        if slot > *entry {
            *entry = slot;
        }
    }

    /// Last fired slot for `block`.
    #[must_use]
    pub fn last_fired(&self, block: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(block).copied()
    }

    /// Iterates blocks and their last slots.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.last_fired.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A block selected to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueBlock {
    /// Block name.
    pub block_name: String,
    /// Boundary that made it due.
    pub slot: DateTime<Utc>,
    /// Schedule type label.
    pub schedule: &'static str,
}

impl fmt::Display for DueBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} @ {})", self.block_name, self.schedule, self.slot.to_rfc3339())
    }
}

/// Evaluates schedule entries at an instant.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    timezone: Tz,
    lookback_minutes: u32,
    min_interval: u32,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub const fn new(timezone: Tz, lookback_minutes: u32, min_interval: u32) -> Self {
        Self {
            timezone,
            lookback_minutes,
            min_interval,
        }
    }

    /// Blocks due at `now` that the ledger has not fired yet.
    ///
    /// A block listed by several entries is returned once, for its first due
    /// entry.
    #[must_use]
    pub fn due_blocks(
        &self,
        entries: &[ScheduleEntry],
        ledger: &ScheduleLedger,
        now: DateTime<Utc>,
    ) -> Vec<DueBlock> {
        let local = now.with_timezone(&self.timezone);
        let mut due: Vec<DueBlock> = Vec::new();
        for entry in entries {
            if due.iter().any(|d| d.block_name == entry.block_name) {
                continue;
            }
            let Some(slot) = entry.due_slot(local, self.lookback_minutes, self.min_interval) else {
                continue;
            };
            if !ledger.should_fire(&entry.block_name, slot) {
                tracing::debug!(
                    block = %entry.block_name,
                    slot = %slot,
                    "slot already fired"
                );
                continue;
            }
            due.push(DueBlock {
                block_name: entry.block_name.clone(),
                slot,
                schedule: entry.kind.label(),
            });
        }
        due
    }
}
