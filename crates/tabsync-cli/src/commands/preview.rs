//! Preview command - fetch one job without writing.

use anyhow::{Context, Result};
use clap::Args;
use tabled::builder::Builder;

use super::Session;
use crate::OutputFormat;

/// Arguments for the preview command.
#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Job sheet row number (the first job is row 2).
    #[arg(long, short = 'r')]
    pub row: usize,

    /// Maximum number of rows to print.
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

/// Execute the preview command.
///
/// # Errors
///
/// Returns an error if the row holds no job or its source cannot be
/// fetched.
pub async fn execute(args: PreviewArgs, session: &Session) -> Result<()> {
    let dataset = session
        .engine()
        .preview(args.row)
        .await
        .with_context(|| format!("Failed to preview job at row {}", args.row))?;

    let shown = dataset.table.rows().iter().take(args.limit);

    match session.format() {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "row": dataset.row_number,
                "key": dataset.key,
                "headers": dataset.table.headers(),
                "rows": shown.collect::<Vec<_>>(),
                "total": dataset.len(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!(
                "Row {}: {} rows from {} / {} ({})",
                dataset.row_number,
                dataset.len(),
                dataset.key.source_link,
                dataset.key.source_sheet,
                dataset.key.month
            );
            println!("{}", dataset.table.headers().join("\t"));
            for row in shown {
                println!("{}", row.join("\t"));
            }
        }
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(dataset.table.headers().iter().cloned());
            for row in shown {
                builder.push_record(row.iter().cloned());
            }
            println!("{}", builder.build());
        }
    }

    if dataset.len() > args.limit && session.format() != OutputFormat::Json {
        println!("... {} more rows", dataset.len() - args.limit);
    }
    Ok(())
}
