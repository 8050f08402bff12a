//! Due command - show which blocks would run.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use super::{Session, instant};
use crate::OutputFormat;

/// Arguments for the due command.
#[derive(Debug, Args)]
pub struct DueArgs {
    /// Evaluate schedules at this RFC 3339 instant instead of now.
    #[arg(long)]
    pub at: Option<String>,
}

/// Execute the due command. Nothing is written.
///
/// # Errors
///
/// Returns an error if `--at` is invalid or the schedule cannot be read.
pub async fn execute(args: DueArgs, session: &Session) -> Result<()> {
    let now = instant(args.at.as_deref())?;
    let due = session.engine().due(now).await?;

    match session.format() {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&due)?);
        }
        OutputFormat::Text => {
            if due.is_empty() {
                println!("No blocks due at {}", now.to_rfc3339());
                return Ok(());
            }
            println!("Due at {}:", now.to_rfc3339());
            for block in &due {
                println!(
                    "  {} {} @ {}",
                    block.block_name.bold(),
                    block.schedule.dimmed(),
                    block.slot.to_rfc3339()
                );
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct DueRow {
                #[tabled(rename = "Block")]
                block: String,
                #[tabled(rename = "Schedule")]
                schedule: &'static str,
                #[tabled(rename = "Slot")]
                slot: String,
            }

            let rows: Vec<_> = due
                .iter()
                .map(|b| DueRow {
                    block: b.block_name.clone(),
                    schedule: b.schedule,
                    slot: b.slot.to_rfc3339(),
                })
                .collect();

            if rows.is_empty() {
                println!("No blocks due");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
