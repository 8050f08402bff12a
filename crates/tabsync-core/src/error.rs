//! Error types and result aliases for tabsync.
//!
//! This module defines the shared error types used by the core primitives.
//! Errors are structured for programmatic handling and include context for debugging.

/// The result type used throughout tabsync-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A document link could not be parsed.
    #[error("malformed document link '{link}': {reason}")]
    InvalidLink {
        /// The offending link, as supplied.
        link: String,
        /// Why the link was rejected.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The run lease is held by another active holder.
    #[error("lease held by {holder_id} since {acquired_at}")]
    LeaseHeld {
        /// Current holder of the lease.
        holder_id: String,
        /// When the current holder acquired it (RFC 3339).
        acquired_at: String,
    },
}

impl Error {
    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new malformed link error.
    #[must_use]
    pub fn invalid_link(link: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLink {
            link: link.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error signals lease contention.
    #[must_use]
    pub const fn is_lease_held(&self) -> bool {
        matches!(self, Self::LeaseHeld { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
