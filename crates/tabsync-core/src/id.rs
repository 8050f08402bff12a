//! Strongly-typed identifiers for tabsync entities.
//!
//! Run IDs are ULIDs: sortable by creation time and unique without
//! coordination. Holder IDs are free-form strings because operators pick them
//! (a hostname, a job name) when they do not want a generated one.
//!
//! # Example
//!
//! ```rust
//! use tabsync_core::id::{HolderId, RunId};
//!
//! let run = RunId::generate();
//! let holder = HolderId::new("nightly-bot");
//! assert_eq!(holder.as_str(), "nightly-bot");
//! # let _ = run;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a new unique run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a run ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid run ID '{s}': {e}"),
            })
    }
}

/// Identity of a lease holder.
///
/// Two processes must never share a holder ID, otherwise one could release
/// the other's lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    /// Creates a holder ID from an operator-supplied name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a unique holder ID with the given prefix (`prefix-<ulid>`).
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Ulid::new()))
    }

    /// Returns the holder ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HolderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidId {
                message: "holder ID cannot be empty".into(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrips_through_display() {
        let id = RunId::generate();
        let parsed: RunId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<RunId>().is_err());
    }

    #[test]
    fn generated_holders_are_distinct() {
        let a = HolderId::generate("bot");
        let b = HolderId::generate("bot");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("bot-"));
    }

    #[test]
    fn holder_id_trims_and_rejects_empty() {
        let id: HolderId = "  worker-1 ".parse().expect("parse");
        assert_eq!(id.as_str(), "worker-1");
        assert!("   ".parse::<HolderId>().is_err());
    }
}
