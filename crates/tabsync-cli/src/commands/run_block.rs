//! Run-block command - execute one block on demand.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use super::{Session, print_report};

/// Arguments for the run-block command.
#[derive(Debug, Args)]
pub struct RunBlockArgs {
    /// Block name as written in the job sheet.
    #[arg()]
    pub block: String,
}

/// Execute the run-block command.
///
/// # Errors
///
/// Returns an error if the lease is held elsewhere, the master workbook
/// cannot be read, or the snapshot cannot be saved.
pub async fn execute(args: RunBlockArgs, session: &Session) -> Result<()> {
    let block = args.block.trim();
    if block.is_empty() {
        anyhow::bail!("Block name must not be empty");
    }

    let report = session
        .engine()
        .run_block(block, Utc::now())
        .await
        .with_context(|| format!("Failed to run block '{block}'"))?;
    session.persist()?;

    print_report(&report, session.format())
}
