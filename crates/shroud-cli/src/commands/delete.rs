//! Delete command - remove dumps by id or retention policy.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use owo_colors::OwoColorize;

use shroud_catalog::gc::{DeleteOptions, RetentionEngine, RetentionReport};
use shroud_core::config::Config;

use crate::open_storage;

/// Arguments for the delete command.
///
/// At least one criterion (dump id, `--retain-recent`, `--prune-failed`,
/// `--before-date` or `--retain-for`) must be given. When several are, the
/// first in the order `--retain-for`, `--retain-recent`, `--prune-failed`,
/// `--before-date`, dump id applies.
#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Dump ID to delete.
    #[arg()]
    pub dump_id: Option<String>,

    /// Keep the N most recent successful dumps and delete the rest.
    #[arg(long)]
    pub retain_recent: Option<usize>,

    /// Delete failed dumps.
    #[arg(long)]
    pub prune_failed: bool,

    /// With --prune-failed, also delete dumps whose status is unknown.
    #[arg(long)]
    pub prune_unsafe: bool,

    /// Delete successful dumps started before this RFC3339 date.
    #[arg(long, value_parser = parse_rfc3339)]
    pub before_date: Option<DateTime<Utc>>,

    /// Delete successful dumps older than this duration (e.g. `30d`, `12h`).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub retain_for: Option<Duration>,

    /// Show what would be deleted without deleting anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl DeleteArgs {
    /// Converts the flags into catalog deletion options.
    #[must_use]
    pub fn options(&self) -> DeleteOptions {
        DeleteOptions {
            dump_id: self.dump_id.clone(),
            retain_recent: self.retain_recent,
            prune_failed: self.prune_failed,
            prune_unsafe: self.prune_unsafe,
            before_date: self.before_date,
            retain_for: self.retain_for,
            dry_run: self.dry_run,
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC3339 date such as 2024-01-31T00:00:00Z: {e}"))
}

/// Execute the delete command.
///
/// # Errors
///
/// Returns an error if the criteria are missing or invalid, the dump id is
/// unknown, or storage fails while deleting.
pub async fn execute(args: DeleteArgs, config: &Config) -> Result<()> {
    let options = args.options();
    // Reject bad criteria before touching storage.
    options.validate().context("invalid deletion criteria")?;

    let storage = open_storage(config)?;
    let engine = RetentionEngine::new(storage, config.heartbeat.stale_after);
    let report = engine.run(&options).await.context("delete dumps")?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &RetentionReport) {
    if report.selected.is_empty() {
        println!("No dumps matched {}", report.mode);
        return;
    }

    let verb = if report.dry_run {
        "Would delete".yellow().to_string()
    } else {
        "Deleted".red().to_string()
    };
    println!("{verb} {} dump(s) ({}):", report.selected.len(), report.mode);
    for info in &report.selected {
        println!("  {} {}", info.dump_id, info.status.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use shroud_catalog::gc::DeleteMode;

    use crate::{Cli, Commands};

    fn parse(args: &[&str]) -> DeleteArgs {
        let mut argv = vec!["shroud", "delete"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Delete(args) => args,
            Commands::ListDumps(_) => panic!("expected delete"),
        }
    }

    #[test]
    fn flags_map_to_options() {
        let options = parse(&["--retain-for", "30d", "--dry-run"]).options();
        assert_eq!(options.retain_for, Some(Duration::from_secs(30 * 86_400)));
        assert!(options.dry_run);
        assert!(options.validate().is_ok());

        let options = parse(&["--before-date", "2024-01-31T10:00:00+02:00"]).options();
        assert_eq!(
            options.before_date.map(|d| d.to_rfc3339()),
            Some("2024-01-31T08:00:00+00:00".to_string())
        );

        let options = parse(&["01HZX3K9R8ZQ4W5T6Y7U8I9O0P"]).options();
        assert_eq!(options.dump_id.as_deref(), Some("01HZX3K9R8ZQ4W5T6Y7U8I9O0P"));
    }

    #[test]
    fn malformed_date_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["shroud", "delete", "--before-date", "yesterday"]);
        assert!(result.is_err());
    }

    #[test]
    fn several_criteria_pick_the_highest_priority() {
        let options = parse(&["--retain-recent", "2", "--prune-failed"]).options();
        assert_eq!(options.mode().expect("mode"), DeleteMode::RetainRecent(2));

        let options = parse(&["d1", "--before-date", "2024-01-31T00:00:00Z"]).options();
        assert!(matches!(options.mode(), Ok(DeleteMode::BeforeDate(_))));
    }

    #[tokio::test]
    async fn invalid_criteria_fail_before_storage_is_opened() {
        let mut config = Config::default();
        config.storage.directory = "/nonexistent/shroud".into();

        let err = execute(parse(&["--prune-unsafe"]), &config)
            .await
            .expect_err("unsafe alone");
        assert!(format!("{err:#}").contains("--prune-failed"));

        let err = execute(parse(&[]), &config).await.expect_err("no criteria");
        assert!(format!("{err:#}").contains("at least one"));

        // Valid criteria get past validation and fail on the missing directory.
        let err = execute(parse(&["--retain-recent", "2", "--prune-failed"]), &config)
            .await
            .expect_err("missing directory");
        assert!(format!("{err:#}").contains("open storage directory"));
    }
}
