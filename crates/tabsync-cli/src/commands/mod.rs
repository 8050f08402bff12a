//! CLI command implementations.

pub mod due;
pub mod lease;
pub mod preview;
pub mod run;
pub mod run_block;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use tabsync_engine::job::JobResult;
use tabsync_engine::prelude::*;

use crate::{Cli, OutputFormat, parse_instant};

/// An engine bound to a provider for the lifetime of one command.
pub struct Session {
    engine: SyncEngine,
    snapshot: Option<(PathBuf, MemoryProvider)>,
    format: OutputFormat,
}

impl Session {
    /// Opens the provider selected by `cli` and builds the engine.
    ///
    /// With `--snapshot` the engine runs against an in-memory copy of the
    /// snapshot file; otherwise it talks to Google Sheets (feature `gcp`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the provider
    /// cannot be opened.
    pub async fn open(cli: &Cli) -> Result<Self> {
        let config = cli.sync_config()?;

        let (provider, snapshot) = match &cli.snapshot {
            Some(path) => {
                let memory = MemoryProvider::load_snapshot(path)
                    .with_context(|| format!("failed to load snapshot {}", path.display()))?;
                tracing::debug!(path = %path.display(), "using snapshot provider");
                let shared: Arc<dyn SpreadsheetProvider> = Arc::new(memory.clone());
                (shared, Some((path.clone(), memory)))
            }
            None => (live_provider(cli).await?, None),
        };

        let engine = SyncEngine::new(provider, config)
            .context("Master sheet is required. Set TABSYNC_MASTER_SHEET or use --master-sheet")?;
        Ok(Self {
            engine,
            snapshot,
            format: cli.format,
        })
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Requested output format.
    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Writes snapshot changes back to disk. No-op for live providers.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot file cannot be written.
    pub fn persist(&self) -> Result<()> {
        if let Some((path, memory)) = &self.snapshot {
            memory
                .save_snapshot(path)
                .with_context(|| format!("failed to save snapshot {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(feature = "gcp")]
async fn live_provider(cli: &Cli) -> Result<Arc<dyn SpreadsheetProvider>> {
    use tabsync_engine::provider::{GoogleSheetsProvider, SheetsConfig};

    let config = SheetsConfig {
        service_account_json: cli.service_account.clone(),
        ..SheetsConfig::default()
    };
    let provider = GoogleSheetsProvider::new(config)
        .await
        .context("failed to authenticate with Google Sheets")?;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "gcp"))]
#[allow(clippy::unused_async)]
async fn live_provider(_cli: &Cli) -> Result<Arc<dyn SpreadsheetProvider>> {
    anyhow::bail!("No provider available. Use --snapshot or build with the `gcp` feature")
}

/// `--at` if given, the current time otherwise.
pub(crate) fn instant(at: Option<&str>) -> Result<DateTime<Utc>> {
    at.map_or_else(|| Ok(Utc::now()), parse_instant)
}

/// Prints a run report in the requested format.
pub(crate) fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!(
                "Run {} ({}): {} jobs, {} failed, {} rows appended",
                report.run_id,
                report.trigger.as_str(),
                report.outcomes.len(),
                report.failed(),
                report.rows_appended()
            );
            if !report.blocks.is_empty() {
                let names: Vec<&str> = report.blocks.iter().map(|b| b.block_name.as_str()).collect();
                println!("  Blocks: {}", names.join(", "));
            }
            for outcome in &report.outcomes {
                let range = outcome.result.range_text();
                println!(
                    "  row {:<4} {} -> {}  {}{}",
                    outcome.job.row_number,
                    outcome.job.source_sheet,
                    outcome.job.destination_sheet,
                    format_result_colored(&outcome.result),
                    if range.is_empty() {
                        String::new()
                    } else {
                        format!(" ({range})")
                    }
                );
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct JobRow {
                #[tabled(rename = "Row")]
                row: usize,
                #[tabled(rename = "Block")]
                block: String,
                #[tabled(rename = "Source Sheet")]
                source: String,
                #[tabled(rename = "Destination Sheet")]
                destination: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Rows")]
                rows: usize,
                #[tabled(rename = "Range")]
                range: String,
            }

            let rows: Vec<_> = report
                .outcomes
                .iter()
                .map(|o| JobRow {
                    row: o.job.row_number,
                    block: o.job.block_name.clone(),
                    source: o.job.source_sheet.clone(),
                    destination: o.job.destination_sheet.clone(),
                    status: o.result.status_text(),
                    rows: o.result.rows(),
                    range: o.result.range_text(),
                })
                .collect();

            if rows.is_empty() {
                println!("No jobs ran");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }
    Ok(())
}

fn format_result_colored(result: &JobResult) -> String {
    let text = result.status_text();
    match result {
        JobResult::Success { .. } => text.green().to_string(),
        JobResult::FetchFailed { .. } | JobResult::WriteFailed { .. } => text.red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tabsync_core::DocumentId;

    use super::*;
    use crate::Commands;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id).expect("doc id")
    }

    fn write_snapshot(name: &str) -> PathBuf {
        let provider = MemoryProvider::new();
        provider.insert_sheet(
            &doc("src1"),
            "Data",
            vec![s(&["Name", "Amount"]), s(&["A", "10"]), s(&["B", "20"])],
        );
        provider.insert_sheet(&doc("dst1"), "Tong_Hop", vec![s(&["Name", "Amount"])]);
        provider.insert_sheet(
            &doc("master"),
            "luu_cau_hinh",
            vec![
                s(&[
                    "Block",
                    "Status",
                    "Month",
                    "Source Link",
                    "Source Sheet",
                    "Destination Link",
                    "Destination Sheet",
                    "Result",
                    "Result Range",
                ]),
                s(&[
                    "Daily",
                    "Pending",
                    "05/2024",
                    "https://docs.google.com/spreadsheets/d/src1/edit",
                    "Data",
                    "https://docs.google.com/spreadsheets/d/dst1/edit",
                    "Tong_Hop",
                    "",
                    "",
                ]),
            ],
        );

        let path = std::env::temp_dir().join(format!("tabsync-{}-{name}.json", std::process::id()));
        provider.save_snapshot(&path).expect("save snapshot");
        path
    }

    fn cli(path: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec![
            "tabsync".to_string(),
            "--master-sheet".to_string(),
            "master".to_string(),
            "--snapshot".to_string(),
            path.display().to_string(),
        ];
        argv.extend(args.iter().map(ToString::to_string));
        Cli::parse_from(argv)
    }

    #[tokio::test(start_paused = true)]
    async fn run_block_persists_snapshot() {
        let path = write_snapshot("run-block");
        let cli = cli(&path, &["run-block", "Daily"]);
        let session = Session::open(&cli).await.expect("session");

        let Commands::RunBlock(args) = cli.command else {
            panic!("expected run-block");
        };
        run_block::execute(args, &session).await.expect("run");

        let reloaded = MemoryProvider::load_snapshot(&path).expect("reload");
        let rows = reloaded.sheet_rows(&doc("dst1"), "Tong_Hop").expect("destination");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "A");
        let jobs = reloaded.sheet_rows(&doc("master"), "luu_cau_hinh").expect("jobs");
        assert_eq!(jobs[1][7], "Success");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn run_at_past_instant_reclaims_expired_lease() {
        let path = write_snapshot("run-at");
        let provider = MemoryProvider::load_snapshot(&path).expect("load");
        provider.insert_sheet(
            &doc("master"),
            "sys_config",
            vec![
                s(&["Block_Name", "Loai_Lich", "Thong_So_Chinh", "Thong_So_Phu"]),
                s(&["Daily", "Chạy theo phút", "50", ""]),
            ],
        );
        provider.insert_sheet(
            &doc("master"),
            "sys_lock",
            vec![
                s(&["Locked", "Holder", "Acquired At"]),
                s(&["TRUE", "bot-b", "2024-05-06T00:45:00+07:00"]),
            ],
        );
        provider.save_snapshot(&path).expect("save snapshot");

        let cli = cli(
            &path,
            &["--holder-id", "cli-bot", "run", "--at", "2024-05-06T00:50:00+07:00"],
        );
        let session = Session::open(&cli).await.expect("session");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        run::execute(args, &session).await.expect("run");

        let reloaded = MemoryProvider::load_snapshot(&path).expect("reload");
        let jobs = reloaded.sheet_rows(&doc("master"), "luu_cau_hinh").expect("jobs");
        assert_eq!(jobs[1][7], "Success");
        let lease = reloaded.sheet_rows(&doc("master"), "sys_lock").expect("lease");
        assert_eq!(lease[1][0], "FALSE");
        assert_eq!(lease[1][1], "cli-bot");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn due_does_not_touch_snapshot() {
        let path = write_snapshot("due");
        let before = std::fs::read(&path).expect("read");
        let cli = cli(&path, &["due", "--at", "2024-05-06T00:50:00+07:00"]);
        let session = Session::open(&cli).await.expect("session");

        let Commands::Due(args) = cli.command else {
            panic!("expected due");
        };
        due::execute(args, &session).await.expect("due");

        assert_eq!(std::fs::read(&path).expect("read"), before);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_instant_defaults_to_now() {
        let before = Utc::now();
        let at = instant(None).expect("now");
        assert!(at >= before);
        assert!(instant(Some("not a time")).is_err());
    }
}
