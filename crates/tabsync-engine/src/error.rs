//! Error types for the sync engine.
//!
//! Every failure a job can hit maps onto one variant here, and every variant
//! renders as human-readable text: these strings end up in the job's result
//! field and in the run log.

use crate::provider::{ProviderError, ProviderErrorKind};

/// The result type used throughout tabsync-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source or destination link is malformed.
    #[error("malformed link '{link}': {reason}")]
    LinkFormat {
        /// The offending link.
        link: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A named worksheet does not exist in the document.
    #[error("sheet '{sheet}' not found in document {document}")]
    SheetNotFound {
        /// Document that was searched.
        document: String,
        /// The missing worksheet title.
        sheet: String,
    },

    /// A filter clause could not be parsed or applied.
    #[error("filter error in clause '{clause}': {reason}")]
    FilterSyntax {
        /// The offending clause, as written.
        clause: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A provider failure while deleting or appending destination rows.
    #[error("write failed: {message}")]
    Write {
        /// Description of the failure.
        message: String,
    },

    /// The run lease is held by another active holder ("system busy").
    #[error("system busy: run lease held by {holder} since {since}")]
    LockContention {
        /// Current lease holder.
        holder: String,
        /// When the holder acquired the lease.
        since: String,
    },

    /// Access to a document was denied.
    #[error("permission denied for {link}: {message}")]
    Permission {
        /// The document link that failed the check.
        link: String,
        /// Provider message.
        message: String,
    },

    /// A spreadsheet provider call failed.
    #[error(transparent)]
    Provider(ProviderError),

    /// Invalid engine configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// An error from tabsync-core.
    #[error("core error: {0}")]
    Core(#[source] tabsync_core::Error),
}

impl Error {
    /// Creates a new filter syntax error.
    #[must_use]
    pub fn filter(clause: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FilterSyntax {
            clause: clause.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Converts a provider failure raised during the write phase.
    ///
    /// Permission failures keep their category; everything else is a write error.
    #[must_use]
    pub fn from_write_failure(link: &str, err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::PermissionDenied => Self::Permission {
                link: link.to_string(),
                message: err.message,
            },
            _ => Self::Write {
                message: err.to_string(),
            },
        }
    }

    /// Converts a provider failure while reading `link`.
    #[must_use]
    pub fn from_read_failure(link: &str, err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::PermissionDenied => Self::Permission {
                link: link.to_string(),
                message: err.message,
            },
            _ => Self::Provider(err),
        }
    }

    /// Returns a stable, low-cardinality label for this error.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::LinkFormat { .. } => "link_format",
            Self::SheetNotFound { .. } => "sheet_not_found",
            Self::FilterSyntax { .. } => "filter_syntax",
            Self::Write { .. } => "write",
            Self::LockContention { .. } => "lock_contention",
            Self::Permission { .. } => "permission",
            Self::Provider(_) => "provider",
            Self::Configuration { .. } => "configuration",
            Self::Core(_) => "core",
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::PermissionDenied => Self::Permission {
                link: String::new(),
                message: err.message,
            },
            _ => Self::Provider(err),
        }
    }
}

impl From<tabsync_core::Error> for Error {
    fn from(err: tabsync_core::Error) -> Self {
        match err {
            tabsync_core::Error::InvalidLink { link, reason } => Self::LinkFormat { link, reason },
            tabsync_core::Error::LeaseHeld {
                holder_id,
                acquired_at,
            } => Self::LockContention {
                holder: holder_id,
                since: acquired_at,
            },
            other => Self::Core(other),
        }
    }
}
