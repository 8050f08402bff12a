//! tabsync CLI - Command-line interface for the sync engine.
//!
//! The main entry point for the `tabsync` binary.

use anyhow::Result;
use clap::Parser;
use tabsync_core::init_logging;

use tabsync_cli::commands::{self, Session};
use tabsync_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format()?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let session = Session::open(&cli).await?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &session).await,
        Commands::RunBlock(args) => commands::run_block::execute(args, &session).await,
        Commands::Due(args) => commands::due::execute(args, &session).await,
        Commands::Preview(args) => commands::preview::execute(args, &session).await,
        Commands::Lease(args) => commands::lease::execute(args, &session).await,
    }
}
