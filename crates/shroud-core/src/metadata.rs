//! Dump metadata (`metadata.json`) and the statistics it carries.
//!
//! Metadata is written once, after every dump task succeeded, and is the
//! source of truth for restore: it lists what was dumped and in which order
//! it must be restored.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::id::{ObjectKind, TaskId};
use crate::scoped_storage::ScopedStorage;

/// Object name of the metadata inside a dump sub-scope.
pub const METADATA_FILE: &str = "metadata.json";

/// Statistics reported by one completed dump task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStat {
    /// Task identity.
    pub id: TaskId,
    /// Kind of object that was dumped.
    pub kind: ObjectKind,
    /// Fully qualified object name.
    pub object_name: String,
    /// Data object written, relative to the dump sub-scope.
    pub filename: String,
    /// Engine that produced the data.
    pub engine: String,
    /// Uncompressed byte size.
    pub original_size: u64,
    /// Compressed byte size as stored.
    pub compressed_size: u64,
    /// Number of records written.
    pub record_count: u64,
}

/// Everything a restorer needs to recreate one dumped object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationItem {
    /// Task identity.
    pub task_id: TaskId,
    /// Data object, relative to the dump sub-scope.
    pub filename: String,
    /// Engine that produced the data.
    pub engine: String,
    /// Kind of object.
    pub object_kind: ObjectKind,
    /// Fully qualified object name.
    pub object_name: String,
    /// Number of records stored.
    pub record_count: u64,
}

impl From<&TaskStat> for RestorationItem {
    fn from(stat: &TaskStat) -> Self {
        Self {
            task_id: stat.id.clone(),
            filename: stat.filename.clone(),
            engine: stat.engine.clone(),
            object_kind: stat.kind,
            object_name: stat.object_name.clone(),
            record_count: stat.record_count,
        }
    }
}

/// Restore ordering computed at dump time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationContext {
    /// Whether `restoration_order` is a valid topological order.
    pub has_topological_order: bool,
    /// Tasks in the order they must be dispatched.
    pub restoration_order: Vec<TaskId>,
    /// For each task, the tasks that must complete before it starts.
    #[serde(default)]
    pub dependencies: BTreeMap<TaskId, Vec<TaskId>>,
}

impl RestorationContext {
    /// Returns the declared dependencies of `task`.
    #[must_use]
    pub fn dependencies_of(&self, task: &TaskId) -> &[TaskId] {
        self.dependencies.get(task).map_or(&[], Vec::as_slice)
    }
}

/// Aggregated statistics of a dump run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpStat {
    /// Restore ordering.
    pub restoration_context: RestorationContext,
    /// Per-task statistics.
    #[serde(default)]
    pub task_stats: BTreeMap<TaskId, TaskStat>,
    /// Per-task restore inputs.
    #[serde(default)]
    pub restoration_items: BTreeMap<TaskId, RestorationItem>,
}

impl DumpStat {
    /// Builds the aggregate from completed task statistics.
    #[must_use]
    pub fn new(restoration_context: RestorationContext, stats: Vec<TaskStat>) -> Self {
        let mut task_stats = BTreeMap::new();
        let mut restoration_items = BTreeMap::new();
        for stat in stats {
            restoration_items.insert(stat.id.clone(), RestorationItem::from(&stat));
            task_stats.insert(stat.id.clone(), stat);
        }
        Self {
            restoration_context,
            task_stats,
            restoration_items,
        }
    }
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Database engine (`postgresql`, `mysql`).
    pub engine: String,
    /// Name of the dumped database.
    #[serde(default)]
    pub database_name: String,
    /// When the dump started.
    pub started_at: DateTime<Utc>,
    /// When the last task completed.
    pub completed_at: DateTime<Utc>,
    /// Sum of uncompressed task sizes.
    pub original_size: u64,
    /// Sum of compressed task sizes.
    pub compressed_size: u64,
    /// Transformation configuration applied during the dump, kept opaque.
    #[serde(default)]
    pub transformers: Vec<serde_json::Value>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Run statistics.
    #[serde(default)]
    pub dump_stat: DumpStat,
}

impl Metadata {
    /// Returns true when any transformation was applied.
    #[must_use]
    pub fn is_transformed(&self) -> bool {
        !self.transformers.is_empty()
    }

    /// Wall time between start and completion.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    /// Reads `metadata.json` from a dump sub-scope.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if absent, or a serialization error if the
    /// object is not valid metadata.
    pub async fn read(storage: &ScopedStorage) -> Result<Self> {
        let data = storage.get_object(METADATA_FILE).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes `metadata.json` into a dump sub-scope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write(&self, storage: &ScopedStorage) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        storage.put_object(METADATA_FILE, Bytes::from(data)).await
    }
}
