//! # tabsync-core
//!
//! Core abstractions shared by every tabsync component.
//!
//! This crate provides the foundational types used by the sync engine and the CLI:
//!
//! - **Identifiers**: Strongly-typed IDs for runs and lease holders
//! - **Document links**: Parsing spreadsheet URLs into document IDs
//! - **Lease**: Run-level mutual exclusion across independent processes
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use tabsync_core::prelude::*;
//!
//! let doc = DocumentId::from_link("https://docs.google.com/spreadsheets/d/abc-123/edit")
//!     .expect("valid link");
//! assert_eq!(doc.as_str(), "abc-123");
//!
//! let run = RunId::generate();
//! assert!(!run.to_string().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod document;
pub mod error;
pub mod id;
pub mod lease;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tabsync_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::document::DocumentId;
    pub use crate::error::{Error, Result};
    pub use crate::id::{HolderId, RunId};
    pub use crate::lease::{
        LeaseGuard, LeaseManager, LeaseRecord, LeaseStore, StoredLease, WritePrecondition,
        WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use document::DocumentId;
pub use error::{Error, Result};
pub use id::{HolderId, RunId};
pub use lease::{
    DEFAULT_LEASE_TTL, LeaseGuard, LeaseManager, LeaseRecord, LeaseStore, StoredLease,
    WritePrecondition, WriteResult,
};
pub use observability::{LogFormat, init_logging};
