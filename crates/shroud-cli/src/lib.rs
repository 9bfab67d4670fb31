//! # shroud-cli
//!
//! Command-line interface over a shroud dump directory.
//!
//! ## Commands
//!
//! - `shroud list-dumps` - List stored dumps with their status
//! - `shroud delete` - Delete dumps under one retention policy
//!
//! ## Configuration
//!
//! Settings come from an optional JSON file (`--config`), then `SHROUD_*`
//! environment variables, then the flags below:
//!
//! - `--storage-dir` / `SHROUD_STORAGE_DIR` - Root of the dump directory
//! - `--log-format` / `SHROUD_LOG_FORMAT` - `text` or `json`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use shroud_core::config::Config;
use shroud_core::observability::LogFormat;
use shroud_core::scoped_storage::ScopedStorage;
use shroud_core::storage::LocalFsBackend;

/// Shroud - database dump catalog command-line interface.
#[derive(Debug, Parser)]
#[command(name = "shroud")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory holding one sub-directory per dump.
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the effective configuration: file, environment, then flags.
    ///
    /// The result is not validated; call [`Config::validate`] once logging
    /// is up so normalization warnings are visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file or an environment variable is
    /// malformed.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref()).context("load configuration")?;
        if let Some(dir) = &self.storage_dir {
            config.storage.directory.clone_from(dir);
        }
        if let Some(format) = self.log_format {
            config.log.format = format.into();
        }
        Ok(config)
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List stored dumps.
    ListDumps(commands::list::ListArgs),
    /// Delete dumps by id or retention policy.
    Delete(commands::delete::DeleteArgs),
}

/// Log format flag.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable text logs.
    #[default]
    Text,
    /// JSON structured logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Opens the configured dump directory as the storage root.
///
/// # Errors
///
/// Returns an error if the directory does not exist.
pub fn open_storage(config: &Config) -> Result<ScopedStorage> {
    let backend = LocalFsBackend::new(&config.storage.directory).with_context(|| {
        format!(
            "open storage directory {}",
            config.storage.directory.display()
        )
    })?;
    Ok(ScopedStorage::root(Arc::new(backend)))
}
