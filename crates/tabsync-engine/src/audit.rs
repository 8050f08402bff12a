//! Audit log entries: one per run or operator action.
//!
//! Audit writes are fail-open. A failed write is logged and never fails the
//! run it describes.

use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::run_log::format_timestamp;

/// Header written when the audit sheet is created.
pub const AUDIT_LOG_HEADER: [&str; 4] = ["Time", "Actor", "Action", "Detail"];

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A schedule-triggered run.
    ScheduledRun,
    /// A block run on request.
    ManualRun,
    /// The run lease was cleared by an operator.
    LeaseBroken,
}

impl AuditAction {
    /// Label written to the sheet.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ScheduledRun => "Scheduled Run",
            Self::ManualRun => "Manual Run",
            Self::LeaseBroken => "Lease Broken",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Who did it.
    pub actor: String,
    /// What was done.
    pub action: AuditAction,
    /// Free text.
    pub detail: String,
}

impl AuditEntry {
    /// Entry for a run over `blocks`.
    #[must_use]
    pub fn run(at: DateTime<Utc>, actor: &str, action: AuditAction, blocks: &[String]) -> Self {
        Self {
            at,
            actor: actor.to_string(),
            action,
            detail: format!("Blocks: {}", blocks.join(", ")),
        }
    }

    /// Sheet row in [`AUDIT_LOG_HEADER`] order.
    #[must_use]
    pub fn to_row(&self, tz: Tz) -> Vec<String> {
        vec![
            format_timestamp(self.at, tz),
            self.actor.clone(),
            self.action.label().to_string(),
            self.detail.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_entry_lists_blocks() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 17, 30, 0).single().expect("time");
        let entry = AuditEntry::run(
            at,
            "AUTO_BOT",
            AuditAction::ScheduledRun,
            &["A".to_string(), "B".to_string()],
        );
        assert_eq!(
            entry.to_row(chrono_tz::Asia::Ho_Chi_Minh),
            vec!["07/05/2024 00:30:00", "AUTO_BOT", "Scheduled Run", "Blocks: A, B"]
        );
    }
}
