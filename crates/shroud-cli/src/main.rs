//! Shroud CLI - dump catalog command-line interface.
//!
//! The main entry point for the `shroud` CLI binary.

use anyhow::{Context, Result};
use clap::Parser;

use shroud_cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let mut config = cli.config()?;

    shroud_core::observability::init_logging(config.log.format);
    config.validate().context("invalid configuration")?;

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::ListDumps(args) => shroud_cli::commands::list::execute(&args, &config).await,
            Commands::Delete(args) => shroud_cli::commands::delete::execute(args, &config).await,
        }
    })
}
