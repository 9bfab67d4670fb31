//! List command - show stored dumps.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::Args;
use tabled::{Table, Tabled};

use shroud_catalog::listing::{DumpInfo, DumpStatus, ListFilter, list_dumps};
use shroud_core::config::Config;

use crate::open_storage;

const DESCRIPTION_WIDTH: usize = 60;

/// Arguments for the list-dumps command.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print dump IDs only.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Only show dumps carrying this tag (repeatable; all must match).
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only show dumps with this status (repeatable; any may match).
    #[arg(long = "status")]
    pub statuses: Vec<DumpStatus>,
}

impl ListArgs {
    fn filter(&self) -> ListFilter {
        ListFilter {
            tags: self.tags.clone(),
            statuses: self.statuses.clone(),
        }
    }
}

/// One line of the dump table.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct DumpRow {
    /// Dump ID.
    #[tabled(rename = "ID")]
    pub id: String,
    /// Completion time (RFC3339).
    #[tabled(rename = "DATE")]
    pub date: String,
    /// Database engine.
    #[tabled(rename = "ENGINE")]
    pub engine: String,
    /// Database name.
    #[tabled(rename = "DATABASE")]
    pub database: String,
    /// Uncompressed size.
    #[tabled(rename = "SIZE")]
    pub size: String,
    /// Compressed size.
    #[tabled(rename = "COMPRESSED SIZE")]
    pub compressed_size: String,
    /// Wall time as `HH:MM:SS`.
    #[tabled(rename = "DURATION")]
    pub duration: String,
    /// Whether transformers were applied.
    #[tabled(rename = "TRANSFORMED")]
    pub transformed: String,
    /// Effective status.
    #[tabled(rename = "STATUS")]
    pub status: String,
    /// Description, truncated.
    #[tabled(rename = "DESCRIPTION")]
    pub description: String,
    /// Comma-separated tags.
    #[tabled(rename = "TAGS")]
    pub tags: String,
}

impl DumpRow {
    /// Builds a row; only `done` dumps fill the run columns.
    #[must_use]
    pub fn from_info(info: &DumpInfo) -> Self {
        let mut row = Self {
            id: info.dump_id.clone(),
            date: String::new(),
            engine: String::new(),
            database: String::new(),
            size: String::new(),
            compressed_size: String::new(),
            duration: String::new(),
            transformed: "false".into(),
            status: info.status.to_string(),
            description: String::new(),
            tags: String::new(),
        };
        let Some(metadata) = &info.metadata else {
            return row;
        };
        row.engine.clone_from(&metadata.engine);
        row.description = truncate(&metadata.description, DESCRIPTION_WIDTH);
        row.tags = metadata.tags.join(", ");
        if info.status == DumpStatus::Done {
            row.date = metadata
                .completed_at
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            row.database.clone_from(&metadata.database_name);
            row.size = size_pretty(metadata.original_size);
            row.compressed_size = size_pretty(metadata.compressed_size);
            row.duration = clock(metadata.duration());
            row.transformed = metadata.is_transformed().to_string();
        }
        row
    }
}

/// Execute the list-dumps command.
///
/// # Errors
///
/// Returns an error if the storage root cannot be listed.
pub async fn execute(args: &ListArgs, config: &Config) -> Result<()> {
    let storage = open_storage(config)?;
    let dumps = list_dumps(&storage, config.heartbeat.stale_after, Utc::now())
        .await
        .context("list dumps")?;
    let shown = select(dumps, &args.filter());

    if args.quiet {
        for info in &shown {
            println!("{}", info.dump_id);
        }
        return Ok(());
    }
    if shown.is_empty() {
        println!("No dumps found");
        return Ok(());
    }
    let rows: Vec<_> = shown.iter().map(DumpRow::from_info).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Drops unreadable dumps (with a warning) and those the filter rejects.
#[must_use]
pub fn select(dumps: Vec<DumpInfo>, filter: &ListFilter) -> Vec<DumpInfo> {
    dumps
        .into_iter()
        .filter(|info| {
            if let Some(error) = &info.error {
                tracing::warn!(
                    dump_id = %info.dump_id,
                    error = %error,
                    hint = "delete the dump if it's corrupted",
                    "unable to render dump"
                );
                return false;
            }
            if !filter.matches(info) {
                tracing::debug!(dump_id = %info.dump_id, "dump does not match the filter, skipping");
                return false;
            }
            true
        })
        .collect()
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width - 3).collect();
    out.push_str("...");
    out
}

fn clock(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[allow(clippy::cast_precision_loss)]
fn size_pretty(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}iB", bytes as f64 / div as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shroud_core::metadata::{DumpStat, Metadata};

    fn metadata() -> Metadata {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("date");
        Metadata {
            engine: "postgresql".into(),
            database_name: "shop".into(),
            started_at,
            completed_at: started_at + chrono::Duration::seconds(3 * 3600 + 25 * 60 + 7),
            original_size: 5 * 1024 * 1024,
            compressed_size: 512,
            transformers: vec![serde_json::json!({"name": "RandomString"})],
            description: "x".repeat(70),
            tags: vec!["prod".into(), "nightly".into()],
            dump_stat: DumpStat::default(),
        }
    }

    fn info(id: &str, status: DumpStatus) -> DumpInfo {
        let metadata = metadata();
        DumpInfo {
            dump_id: id.into(),
            date: Some(metadata.started_at),
            status,
            database: Some(metadata.database_name.clone()),
            metadata: Some(metadata),
            error: None,
        }
    }

    #[test]
    fn done_row_fills_every_column() {
        let row = DumpRow::from_info(&info("d1", DumpStatus::Done));
        assert_eq!(row.date, "2024-03-01T13:25:07Z");
        assert_eq!(row.database, "shop");
        assert_eq!(row.size, "5.0 MiB");
        assert_eq!(row.compressed_size, "512 B");
        assert_eq!(row.duration, "03:25:07");
        assert_eq!(row.transformed, "true");
        assert_eq!(row.status, "done");
        assert_eq!(row.description.chars().count(), 60);
        assert!(row.description.ends_with("..."));
        assert_eq!(row.tags, "prod, nightly");
    }

    #[test]
    fn unfinished_row_leaves_run_columns_empty() {
        let row = DumpRow::from_info(&info("d2", DumpStatus::Failed));
        assert_eq!(row.engine, "postgresql");
        assert!(row.date.is_empty());
        assert!(row.size.is_empty());
        assert_eq!(row.transformed, "false");
        assert_eq!(row.status, "failed");

        let mut bare = info("d3", DumpStatus::InProgress);
        bare.metadata = None;
        let row = DumpRow::from_info(&bare);
        assert!(row.engine.is_empty());
        assert_eq!(row.status, "in-progress");
    }

    #[test]
    fn select_skips_unreadable_and_filtered_dumps() {
        let mut broken = info("d0", DumpStatus::UnknownOrFailed);
        broken.error = Some("read heartbeat: invalid".into());
        let dumps = vec![
            info("d3", DumpStatus::Done),
            info("d2", DumpStatus::Failed),
            broken,
        ];

        let all = select(dumps.clone(), &ListFilter::default());
        let ids: Vec<_> = all.iter().map(|d| d.dump_id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d2"]);

        let filter = ListFilter {
            tags: vec!["prod".into()],
            statuses: vec![DumpStatus::Failed],
        };
        let failed = select(dumps, &filter);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].dump_id, "d2");
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(truncate("short", 60), "short");
        assert_eq!(size_pretty(1536), "1.5 KiB");
        assert_eq!(size_pretty(3 * 1024 * 1024 * 1024), "3.0 GiB");
        assert_eq!(clock(chrono::Duration::seconds(-5)), "00:00:00");
    }

    #[test]
    fn status_flag_parses() {
        use clap::Parser;
        let cli = crate::Cli::parse_from(["shroud", "list-dumps", "--status", "failed", "--tag", "prod"]);
        let crate::Commands::ListDumps(args) = cli.command else {
            panic!("expected list-dumps");
        };
        assert_eq!(args.statuses, vec![DumpStatus::Failed]);
        assert_eq!(args.tags, vec!["prod".to_string()]);
    }
}
