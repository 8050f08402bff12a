//! # tabsync-cli
//!
//! Command-line interface for the tabsync engine.
//!
//! ## Commands
//!
//! - `tabsync run` - Run every block due now (or at `--at`)
//! - `tabsync run-block` - Run one block immediately
//! - `tabsync due` - List blocks due at an instant
//! - `tabsync preview` - Fetch one job and print it without writing
//! - `tabsync lease` - Inspect or break the run lease
//!
//! ## Configuration
//!
//! Engine settings come from `TABSYNC_*` environment variables (see
//! `SyncConfig::from_env`); the flags below override them:
//!
//! - `TABSYNC_MASTER_SHEET` - Master workbook id or link
//! - `TABSYNC_SNAPSHOT` - Local JSON workbook snapshot to run against
//! - `GCP_SERVICE_ACCOUNT` - Service account JSON (feature `gcp`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tabsync_core::{DocumentId, HolderId, LogFormat};
use tabsync_engine::SyncConfig;

/// tabsync - scheduled spreadsheet range sync.
#[derive(Debug, Parser)]
#[command(name = "tabsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Master workbook id or link.
    #[arg(long, env = "TABSYNC_MASTER_SHEET")]
    pub master_sheet: Option<String>,

    /// Run against a local JSON snapshot of workbooks instead of a live provider.
    #[arg(long, env = "TABSYNC_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Lease holder identity.
    #[arg(long, env = "TABSYNC_HOLDER_ID")]
    pub holder_id: Option<String>,

    /// Service account key JSON for Google Sheets.
    #[arg(long, env = "GCP_SERVICE_ACCOUNT", hide_env_values = true)]
    pub service_account: Option<String>,

    /// Log output format.
    #[arg(long, env = "TABSYNC_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the engine configuration from the environment and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable or flag is invalid.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::from_env().context("invalid TABSYNC_* configuration")?;
        if let Some(master) = &self.master_sheet {
            config.master_sheet = Some(
                DocumentId::from_link_or_id(master).context("invalid --master-sheet")?,
            );
        }
        if let Some(holder) = &self.holder_id {
            config.holder_id = HolderId::new(holder.trim());
        }
        config.log_format = self.log_format()?;
        Ok(config)
    }

    /// The requested log format.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown format name.
    pub fn log_format(&self) -> Result<LogFormat> {
        self.log_format
            .parse()
            .with_context(|| format!("invalid --log-format '{}'", self.log_format))
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every block that is due.
    Run(commands::run::RunArgs),
    /// Run one block now, ignoring its schedule.
    RunBlock(commands::run_block::RunBlockArgs),
    /// List blocks due at an instant.
    Due(commands::due::DueArgs),
    /// Fetch one job and print the result without writing.
    Preview(commands::preview::PreviewArgs),
    /// Inspect or break the run lease.
    Lease(commands::lease::LeaseArgs),
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Parses an RFC 3339 instant for `--at`.
///
/// # Errors
///
/// Returns an error if `value` is not RFC 3339.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value.trim())
        .with_context(|| format!("'{value}' is not an RFC 3339 timestamp"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_and_subcommand() {
        let cli = Cli::parse_from([
            "tabsync",
            "--master-sheet",
            "https://docs.google.com/spreadsheets/d/master-1/edit",
            "--snapshot",
            "/tmp/books.json",
            "--format",
            "json",
            "run-block",
            "Block A",
        ]);

        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.snapshot, Some(PathBuf::from("/tmp/books.json")));
        match cli.command {
            Commands::RunBlock(args) => assert_eq!(args.block, "Block A"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_due_with_instant() {
        let cli = Cli::parse_from(["tabsync", "due", "--at", "2024-05-06T00:50:00+07:00"]);
        let Commands::Due(args) = cli.command else {
            panic!("expected due");
        };
        let at = parse_instant(args.at.as_deref().expect("at")).expect("instant");
        assert_eq!(at.to_rfc3339(), "2024-05-05T17:50:00+00:00");
    }

    #[test]
    fn rejects_bad_instant() {
        assert!(parse_instant("yesterday").is_err());
    }
}
