//! # tabsync-engine
//!
//! Tabular sync engine: copies regions of source spreadsheets into shared
//! destination sheets on a schedule.
//!
//! This crate provides:
//!
//! - **Range Slicer**: `B:E`-style column ranges over a fetched table
//! - **Filter Evaluator**: a small `;`-separated condition language
//! - **Fetch Adapter**: one source table per job, tagged with its provenance key
//! - **Reconciler**: replace-by-key writes into each destination sheet
//! - **Scheduler**: interval, daily, weekly and monthly predicates with a
//!   ledger that fires each boundary once
//! - **Engine**: lease-guarded runs that report results back to the master
//!   workbook
//!
//! ## Guarantees
//!
//! - **Idempotent**: re-running unchanged jobs leaves destinations unchanged
//! - **Key-isolated**: a job only ever deletes rows carrying its own key
//! - **Exclusive**: one run at a time per deployment, through the run lease
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabsync_engine::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let config = SyncConfig::from_env()?;
//! let provider = Arc::new(MemoryProvider::new());
//! let engine = SyncEngine::new(provider, config)?;
//!
//! let report = engine.run_scheduled(chrono::Utc::now()).await?;
//! println!("{} jobs, {} failed", report.outcomes.len(), report.failed());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod job;
pub mod metrics;
pub mod provider;
pub mod range;
pub mod reconcile;
pub mod retry;
pub mod run_log;
pub mod schedule;
pub mod schema;
pub mod sheet_lease;
pub mod store;
pub mod table;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ProvenanceColumns, SheetTitles, SyncConfig};
    pub use crate::engine::{RunReport, SyncEngine, Trigger};
    pub use crate::error::{Error, Result};
    pub use crate::fetch::{FetchRequest, SourceDataset, SourceFetcher};
    pub use crate::job::{JobOutcome, JobResult, JobStatus, ProvenanceKey, SyncJob};
    pub use crate::provider::{
        MemoryProvider, ProviderError, ProviderErrorKind, RowSpan, SpreadsheetProvider,
    };
    pub use crate::reconcile::DestinationReconciler;
    pub use crate::retry::RetryPolicy;
    pub use crate::schedule::{DueBlock, ScheduleEntry, ScheduleKind, ScheduleLedger, Scheduler};
    pub use crate::sheet_lease::SheetLeaseStore;
    pub use crate::store::JobStore;
    pub use crate::table::Table;
}

pub use config::SyncConfig;
pub use engine::{RunReport, SyncEngine};
pub use error::{Error, Result};
