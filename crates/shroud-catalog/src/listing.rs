//! Dump discovery and status classification.
//!
//! Every sub-scope of the storage root is a dump. Its status comes from the
//! heartbeat (with staleness applied) joined with `metadata.json`. Anything
//! that cannot be read is reported as [`DumpStatus::UnknownOrFailed`] and
//! logged, never dropped, so retention treats it as unsafe to touch by
//! default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use shroud_core::heartbeat::{HeartbeatReader, HeartbeatStatus};
use shroud_core::metadata::Metadata;
use shroud_core::scoped_storage::ScopedStorage;

use crate::error::{CatalogError, Result};

/// Effective status of a dump as seen by listing and retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpStatus {
    /// Finished and has metadata.
    Done,
    /// Running, heartbeat is fresh.
    InProgress,
    /// Finished with an error, or stopped refreshing its heartbeat.
    Failed,
    /// Heartbeat or metadata could not be read.
    UnknownOrFailed,
}

impl DumpStatus {
    /// Returns the status as written in listings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::InProgress => "in-progress",
            Self::Failed => "failed",
            Self::UnknownOrFailed => "unknown-or-failed",
        }
    }
}

impl From<HeartbeatStatus> for DumpStatus {
    fn from(status: HeartbeatStatus) -> Self {
        match status {
            HeartbeatStatus::Done => Self::Done,
            HeartbeatStatus::InProgress => Self::InProgress,
            HeartbeatStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for DumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DumpStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "done" => Ok(Self::Done),
            "in-progress" => Ok(Self::InProgress),
            "failed" => Ok(Self::Failed),
            "unknown-or-failed" => Ok(Self::UnknownOrFailed),
            other => Err(CatalogError::invalid_options(format!(
                "unknown dump status '{other}'"
            ))),
        }
    }
}

/// One dump as discovered in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpInfo {
    /// Sub-scope name.
    pub dump_id: String,
    /// Dump start time from metadata, else the last heartbeat update.
    pub date: Option<DateTime<Utc>>,
    /// Effective status.
    pub status: DumpStatus,
    /// Database name from metadata.
    pub database: Option<String>,
    /// Parsed metadata, when readable.
    pub metadata: Option<Metadata>,
    /// Why the dump could not be fully read.
    pub error: Option<String>,
}

impl DumpInfo {
    fn unknown(dump_id: String, date: Option<DateTime<Utc>>, error: String) -> Self {
        Self {
            dump_id,
            date,
            status: DumpStatus::UnknownOrFailed,
            database: None,
            metadata: None,
            error: Some(error),
        }
    }
}

/// Dumps grouped by retention bucket, each sorted newest first by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageResponse {
    /// `done` dumps.
    pub valid: Vec<DumpInfo>,
    /// `failed` dumps, including stale `in-progress` ones.
    pub failed: Vec<DumpInfo>,
    /// Everything else: fresh `in-progress` and unreadable dumps.
    pub unknown_or_failed: Vec<DumpInfo>,
}

impl StorageResponse {
    fn push(&mut self, info: DumpInfo) {
        match info.status {
            DumpStatus::Done => self.valid.push(info),
            DumpStatus::Failed => self.failed.push(info),
            DumpStatus::InProgress | DumpStatus::UnknownOrFailed => {
                self.unknown_or_failed.push(info);
            }
        }
    }

    fn sort(&mut self) {
        for bucket in [&mut self.valid, &mut self.failed, &mut self.unknown_or_failed] {
            bucket.sort_by(|a, b| b.dump_id.cmp(&a.dump_id));
        }
    }

    /// Total number of dumps across buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.valid.len() + self.failed.len() + self.unknown_or_failed.len()
    }

    /// Returns true if storage holds no dumps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads the heartbeat and metadata of one dump sub-scope.
///
/// Never fails: read errors are logged and yield `UnknownOrFailed`.
pub async fn inspect_dump(scope: &ScopedStorage, stale_after: Duration, now: DateTime<Utc>) -> DumpInfo {
    let dump_id = scope.dirname().to_string();
    let heartbeat = match HeartbeatReader::new(scope.clone()).read().await {
        Ok(heartbeat) => heartbeat,
        Err(err) => {
            tracing::warn!(dump_id = %dump_id, error = %err, "unable to read dump status; considering dump as unknown-or-failed");
            return DumpInfo::unknown(dump_id, None, format!("read heartbeat: {err}"));
        }
    };
    let status = DumpStatus::from(heartbeat.status_at(stale_after, now));

    let metadata = match Metadata::read(scope).await {
        Ok(metadata) => Some(metadata),
        Err(err) if status == DumpStatus::Done => {
            tracing::warn!(dump_id = %dump_id, error = %err, "unable to read dump metadata; considering dump as unknown-or-failed");
            return DumpInfo::unknown(
                dump_id,
                Some(heartbeat.updated_at),
                format!("read metadata: {err}"),
            );
        }
        Err(err) => {
            tracing::debug!(dump_id = %dump_id, %status, error = %err, "no metadata for unfinished dump");
            None
        }
    };

    DumpInfo {
        dump_id,
        date: Some(metadata.as_ref().map_or(heartbeat.updated_at, |m| m.started_at)),
        status,
        database: metadata.as_ref().map(|m| m.database_name.clone()),
        metadata,
        error: None,
    }
}

/// Classifies every dump under `root` into retention buckets.
///
/// # Errors
///
/// Returns an error only if the root itself cannot be listed.
pub async fn sorted_dumps_with_statuses(
    root: &ScopedStorage,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<StorageResponse> {
    let (_, dumps) = root.list_dir().await?;
    let mut response = StorageResponse::default();
    for scope in &dumps {
        response.push(inspect_dump(scope, stale_after, now).await);
    }
    response.sort();
    tracing::debug!(
        valid = response.valid.len(),
        failed = response.failed.len(),
        unknown_or_failed = response.unknown_or_failed.len(),
        "classified dumps"
    );
    Ok(response)
}

/// Lists every dump under `root`, newest first by id.
///
/// # Errors
///
/// Returns an error only if the root itself cannot be listed.
pub async fn list_dumps(root: &ScopedStorage, stale_after: Duration, now: DateTime<Utc>) -> Result<Vec<DumpInfo>> {
    let (_, dumps) = root.list_dir().await?;
    let mut infos = Vec::with_capacity(dumps.len());
    for scope in &dumps {
        infos.push(inspect_dump(scope, stale_after, now).await);
    }
    infos.sort_by(|a, b| b.dump_id.cmp(&a.dump_id));
    Ok(infos)
}

/// Returns the newest `done` dump, if any.
///
/// # Errors
///
/// Returns an error only if the root itself cannot be listed.
pub async fn latest_done_dump(
    root: &ScopedStorage,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<Option<DumpInfo>> {
    let mut response = sorted_dumps_with_statuses(root, stale_after, now).await?;
    if response.valid.is_empty() {
        return Ok(None);
    }
    Ok(Some(response.valid.swap_remove(0)))
}

/// Resolves a restore target: `latest` or an explicit dump id.
///
/// An explicit id must have `metadata.json`; `latest` is the newest `done`
/// dump.
///
/// # Errors
///
/// Returns `DumpNotFound` or `NoCompletedDump` when nothing matches.
pub async fn resolve_dump(
    root: &ScopedStorage,
    dump_id: &str,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<ScopedStorage> {
    if dump_id == "latest" {
        let latest = latest_done_dump(root, stale_after, now)
            .await?
            .ok_or(CatalogError::NoCompletedDump)?;
        return Ok(root.sub_storage(&latest.dump_id, true)?);
    }
    let scope = root.sub_storage(dump_id, true)?;
    if !scope.exists(shroud_core::metadata::METADATA_FILE).await? {
        return Err(CatalogError::DumpNotFound {
            dump_id: dump_id.to_string(),
        });
    }
    Ok(scope)
}

/// Selects dumps by tags and statuses. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Every tag must be present in the dump's metadata.
    pub tags: Vec<String>,
    /// The dump's status must be one of these.
    pub statuses: Vec<DumpStatus>,
}

impl ListFilter {
    /// Returns true if `info` passes the filter.
    #[must_use]
    pub fn matches(&self, info: &DumpInfo) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&info.status) {
            return false;
        }
        if self.tags.is_empty() {
            return true;
        }
        info.metadata
            .as_ref()
            .is_some_and(|m| self.tags.iter().all(|tag| m.tags.contains(tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, status: DumpStatus, tags: &[&str]) -> DumpInfo {
        let now = Utc::now();
        let metadata = Metadata {
            engine: "postgresql".into(),
            database_name: "shop".into(),
            started_at: now,
            completed_at: now,
            original_size: 0,
            compressed_size: 0,
            transformers: Vec::new(),
            description: String::new(),
            tags: tags.iter().map(ToString::to_string).collect(),
            dump_stat: shroud_core::metadata::DumpStat::default(),
        };
        DumpInfo {
            dump_id: id.into(),
            date: Some(now),
            status,
            database: Some("shop".into()),
            metadata: Some(metadata),
            error: None,
        }
    }

    #[test]
    fn status_parsing() {
        for status in [
            DumpStatus::Done,
            DumpStatus::InProgress,
            DumpStatus::Failed,
            DumpStatus::UnknownOrFailed,
        ] {
            assert_eq!(status.as_str().parse::<DumpStatus>().expect("parse"), status);
        }
        assert!("finished".parse::<DumpStatus>().is_err());
    }

    #[test]
    fn in_progress_goes_to_unknown_bucket() {
        let mut response = StorageResponse::default();
        response.push(info("a", DumpStatus::InProgress, &[]));
        response.push(info("b", DumpStatus::Done, &[]));
        response.push(info("c", DumpStatus::Done, &[]));
        response.sort();
        assert_eq!(response.unknown_or_failed.len(), 1);
        assert_eq!(response.valid[0].dump_id, "c");
        assert_eq!(response.len(), 3);
    }

    #[test]
    fn filter_requires_all_tags_and_listed_status() {
        let filter = ListFilter {
            tags: vec!["prod".into(), "nightly".into()],
            statuses: vec![DumpStatus::Done],
        };
        assert!(filter.matches(&info("a", DumpStatus::Done, &["prod", "nightly", "eu"])));
        assert!(!filter.matches(&info("a", DumpStatus::Done, &["prod"])));
        assert!(!filter.matches(&info("a", DumpStatus::Failed, &["prod", "nightly"])));

        let mut bare = info("a", DumpStatus::Done, &[]);
        bare.metadata = None;
        assert!(!filter.matches(&bare));
        assert!(ListFilter::default().matches(&bare));
    }
}
