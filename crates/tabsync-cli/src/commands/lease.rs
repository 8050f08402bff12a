//! Lease command - inspect or break the run lease.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;

use super::Session;
use crate::OutputFormat;

/// Arguments for the lease command.
#[derive(Debug, Args)]
pub struct LeaseArgs {
    /// Lease action.
    #[command(subcommand)]
    pub action: LeaseAction,
}

/// Lease actions.
#[derive(Debug, Subcommand)]
pub enum LeaseAction {
    /// Show the current lease record.
    Status,
    /// Clear the lease regardless of holder.
    Break,
}

/// Execute the lease command.
///
/// # Errors
///
/// Returns an error if the lease record cannot be read or cleared.
pub async fn execute(args: LeaseArgs, session: &Session) -> Result<()> {
    match args.action {
        LeaseAction::Status => status(session).await,
        LeaseAction::Break => {
            session.engine().break_lease(Utc::now()).await?;
            session.persist()?;
            println!("{} Lease cleared", "ok".green());
            Ok(())
        }
    }
}

async fn status(session: &Session) -> Result<()> {
    let now = Utc::now();
    let record = session.engine().lease_status().await?;
    let ttl = session.engine().config().lease_ttl;

    if session.format() == OutputFormat::Json {
        let value = serde_json::json!({
            "record": record,
            "fresh": record.as_ref().is_some_and(|r| r.locked && r.is_fresh(now, ttl)),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match record {
        Some(r) if r.locked => {
            let since = r
                .acquired_at
                .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
            let state = if r.is_fresh(now, ttl) {
                "held".red().to_string()
            } else {
                "stale".yellow().to_string()
            };
            println!("Lease {state} by {} since {since}", r.holder_id);
        }
        _ => println!("Lease {}", "free".green()),
    }
    Ok(())
}
