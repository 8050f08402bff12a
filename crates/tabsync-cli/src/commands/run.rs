//! Run command - execute every due block.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use tabsync_engine::Error;

use super::{Session, instant, print_report};
use crate::OutputFormat;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Evaluate schedules at this RFC 3339 instant instead of now.
    ///
    /// The run lease is still stamped with the current time.
    #[arg(long)]
    pub at: Option<String>,
}

/// Execute the run command.
///
/// A lease held by another process is reported and treated as a skipped
/// trigger, not a failure.
///
/// # Errors
///
/// Returns an error if `--at` is invalid, the master workbook cannot be
/// read, or the snapshot cannot be saved.
pub async fn execute(args: RunArgs, session: &Session) -> Result<()> {
    let now = instant(args.at.as_deref())?;

    let report = match session.engine().run_scheduled(now).await {
        Ok(report) => report,
        Err(Error::LockContention { holder, since }) => {
            eprintln!(
                "{} System busy: lease held by {holder} since {since}",
                "skipped".yellow()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    session.persist()?;

    if report.blocks.is_empty() && session.format() != OutputFormat::Json {
        println!("No blocks due");
        return Ok(());
    }
    print_report(&report, session.format())
}
