//! Dump heartbeat: the persisted liveness record of a dump.
//!
//! Each dump sub-scope holds one `heartbeat` object whose content is the raw
//! status (`in-progress`, `done` or `failed`). The update time is the object's
//! modification time, so a rewrite of the same status still refreshes it.
//!
//! Readers never trust `in-progress` blindly: a heartbeat that has not been
//! refreshed within the staleness threshold is reported as [`HeartbeatStatus::Failed`].
//! That inference happens at read time and is never written back.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scoped_storage::ScopedStorage;

/// Object name of the heartbeat inside a dump sub-scope.
pub const HEARTBEAT_FILE: &str = "heartbeat";

/// Persisted dump status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeartbeatStatus {
    /// The dump is running (or died without a terminal write).
    InProgress,
    /// The dump finished successfully.
    Done,
    /// The dump failed.
    Failed,
}

impl HeartbeatStatus {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeartbeatStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidHeartbeat {
                path: HEARTBEAT_FILE.into(),
                value: other.into(),
            }),
        }
    }
}

/// A heartbeat as read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Stored status.
    pub status: HeartbeatStatus,
    /// Last time the heartbeat object was written.
    pub updated_at: DateTime<Utc>,
}

impl Heartbeat {
    /// Derives the effective status at `now`.
    ///
    /// Terminal statuses are returned as-is. `InProgress` becomes `Failed`
    /// once `now - updated_at` exceeds `stale_after`.
    #[must_use]
    pub fn status_at(&self, stale_after: Duration, now: DateTime<Utc>) -> HeartbeatStatus {
        if self.status != HeartbeatStatus::InProgress {
            return self.status;
        }
        let Ok(threshold) = chrono::Duration::from_std(stale_after) else {
            return HeartbeatStatus::InProgress;
        };
        if now - self.updated_at > threshold {
            HeartbeatStatus::Failed
        } else {
            HeartbeatStatus::InProgress
        }
    }
}

/// Writes the heartbeat object of one dump.
#[derive(Debug, Clone)]
pub struct HeartbeatWriter {
    storage: ScopedStorage,
}

impl HeartbeatWriter {
    /// Creates a writer over a dump sub-scope.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self { storage }
    }

    /// Persists `status`, refreshing the heartbeat's update time.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub async fn write(&self, status: HeartbeatStatus) -> Result<()> {
        self.storage
            .put_object(HEARTBEAT_FILE, Bytes::from_static(status.as_str().as_bytes()))
            .await
    }

    /// Returns the dump sub-scope this writer targets.
    #[must_use]
    pub fn storage(&self) -> &ScopedStorage {
        &self.storage
    }
}

/// Reads the heartbeat object of one dump.
#[derive(Debug, Clone)]
pub struct HeartbeatReader {
    storage: ScopedStorage,
}

impl HeartbeatReader {
    /// Creates a reader over a dump sub-scope.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self { storage }
    }

    /// Reads the stored heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if there is no heartbeat,
    /// `Error::InvalidHeartbeat` if the content is not a known status,
    /// or the underlying storage error.
    pub async fn read(&self) -> Result<Heartbeat> {
        let stat = self.storage.stat(HEARTBEAT_FILE).await?;
        let Some(updated_at) = stat.last_modified else {
            return Err(Error::NotFound(format!(
                "heartbeat not found in {}",
                self.storage.prefix()
            )));
        };
        let data = self.storage.get_object(HEARTBEAT_FILE).await?;
        let raw = String::from_utf8_lossy(&data);
        let status = raw
            .trim()
            .parse::<HeartbeatStatus>()
            .map_err(|_| Error::InvalidHeartbeat {
                path: format!("{}/{HEARTBEAT_FILE}", self.storage.prefix()),
                value: raw.to_string(),
            })?;
        Ok(Heartbeat { status, updated_at })
    }

    /// Reads the heartbeat and derives its effective status at the current time.
    ///
    /// # Errors
    ///
    /// Same as [`HeartbeatReader::read`].
    pub async fn status(&self, stale_after: Duration) -> Result<HeartbeatStatus> {
        Ok(self.read().await?.status_at(stale_after, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, StorageBackend};
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    fn heartbeat(status: HeartbeatStatus, age: chrono::Duration, now: DateTime<Utc>) -> Heartbeat {
        Heartbeat {
            status,
            updated_at: now - age,
        }
    }

    #[test]
    fn fresh_in_progress_stays_in_progress() {
        let now = Utc::now();
        let hb = heartbeat(HeartbeatStatus::InProgress, chrono::Duration::minutes(1), now);
        assert_eq!(hb.status_at(3 * MINUTE, now), HeartbeatStatus::InProgress);
    }

    #[test]
    fn stale_in_progress_reads_as_failed() {
        let now = Utc::now();
        let hb = heartbeat(HeartbeatStatus::InProgress, chrono::Duration::minutes(3), now);
        assert_eq!(hb.status_at(MINUTE, now), HeartbeatStatus::Failed);
    }

    #[test]
    fn threshold_boundary_is_not_stale() {
        let now = Utc::now();
        let hb = heartbeat(HeartbeatStatus::InProgress, chrono::Duration::minutes(1), now);
        assert_eq!(hb.status_at(MINUTE, now), HeartbeatStatus::InProgress);
    }

    #[test]
    fn terminal_statuses_ignore_age() {
        let now = Utc::now();
        for status in [HeartbeatStatus::Done, HeartbeatStatus::Failed] {
            let hb = heartbeat(status, chrono::Duration::days(30), now);
            assert_eq!(hb.status_at(MINUTE, now), status);
        }
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(
            "done".parse::<HeartbeatStatus>().expect("valid"),
            HeartbeatStatus::Done
        );
        assert!(matches!(
            "unknown".parse::<HeartbeatStatus>(),
            Err(Error::InvalidHeartbeat { .. })
        ));
    }

    #[tokio::test]
    async fn writer_and_reader_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let scope = ScopedStorage::with_prefix(backend.clone(), "dump1").expect("scope");

        HeartbeatWriter::new(scope.clone())
            .write(HeartbeatStatus::InProgress)
            .await
            .expect("write");
        assert_eq!(
            backend.get("dump1/heartbeat").await.expect("raw"),
            Bytes::from("in-progress")
        );

        let hb = HeartbeatReader::new(scope).read().await.expect("read");
        assert_eq!(hb.status, HeartbeatStatus::InProgress);
    }

    #[tokio::test]
    async fn reader_reports_missing_and_invalid() {
        let backend = Arc::new(MemoryBackend::new());
        let scope = ScopedStorage::with_prefix(backend, "dump1").expect("scope");
        let reader = HeartbeatReader::new(scope.clone());

        assert!(reader.read().await.expect_err("missing").is_not_found());

        scope
            .put_object(HEARTBEAT_FILE, Bytes::from("garbage"))
            .await
            .expect("put");
        assert!(matches!(
            reader.read().await,
            Err(Error::InvalidHeartbeat { .. })
        ));
    }
}
