//! Pre-built test fixtures: dump directories and scripted tasks.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use shroud_core::heartbeat::{HEARTBEAT_FILE, HeartbeatStatus};
use shroud_core::id::{ObjectKind, TaskId};
use shroud_core::metadata::{DumpStat, METADATA_FILE, Metadata, RestorationItem, TaskStat};
use shroud_core::scoped_storage::ScopedStorage;
use shroud_core::storage::StorageBackend;
use shroud_flow::dag::plan_restoration;
use shroud_flow::error::BoxError;
use shroud_flow::task::{DumpTaskProducer, Dumper, Restorer, RestorerFactory, Task, TaskMeta};
use shroud_flow::validation::{ValidationContext, ValidationWarning};

use crate::storage::TracingMemoryBackend;

/// Builds metadata for a fixture dump with sensible defaults.
#[must_use]
pub fn sample_metadata(database: &str, completed_at: DateTime<Utc>) -> Metadata {
    Metadata {
        engine: "postgresql".into(),
        database_name: database.into(),
        started_at: completed_at - chrono::Duration::minutes(5),
        completed_at,
        original_size: 1024,
        compressed_size: 256,
        transformers: Vec::new(),
        description: String::new(),
        tags: Vec::new(),
        dump_stat: DumpStat::default(),
    }
}

/// A dump directory to seed into storage.
#[derive(Debug, Clone)]
pub struct DumpFixture {
    id: String,
    heartbeat: Option<(HeartbeatStatus, Duration)>,
    raw_heartbeat: Option<String>,
    metadata: Option<Metadata>,
    data_files: Vec<String>,
}

impl DumpFixture {
    /// Starts a fixture for dump directory `id`, with no objects.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heartbeat: None,
            raw_heartbeat: None,
            metadata: None,
            data_files: Vec::new(),
        }
    }

    /// Writes a heartbeat with `status`, last updated `age` ago.
    #[must_use]
    pub fn heartbeat(mut self, status: HeartbeatStatus, age: Duration) -> Self {
        self.heartbeat = Some((status, age));
        self
    }

    /// Writes a heartbeat with arbitrary content (for unparsable cases).
    #[must_use]
    pub fn raw_heartbeat(mut self, content: impl Into<String>) -> Self {
        self.raw_heartbeat = Some(content.into());
        self
    }

    /// Writes `metadata.json`.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Writes an extra data object inside the dump directory.
    #[must_use]
    pub fn data_file(mut self, name: impl Into<String>) -> Self {
        self.data_files.push(name.into());
        self
    }

    /// Writes the fixture into `backend` under the root scope.
    pub async fn write(self, backend: &TracingMemoryBackend) {
        let heartbeat_path = format!("{}/{HEARTBEAT_FILE}", self.id);
        if let Some((status, age)) = self.heartbeat {
            backend
                .put(&heartbeat_path, Bytes::from(status.as_str()))
                .await
                .expect("heartbeat");
            let age = chrono::Duration::from_std(age).expect("age fits");
            backend.set_last_modified(&heartbeat_path, Utc::now() - age);
        } else if let Some(raw) = self.raw_heartbeat {
            backend
                .put(&heartbeat_path, Bytes::from(raw))
                .await
                .expect("heartbeat");
        }
        if let Some(metadata) = self.metadata {
            let data = serde_json::to_vec(&metadata).expect("metadata json");
            backend
                .put(&format!("{}/{METADATA_FILE}", self.id), Bytes::from(data))
                .await
                .expect("metadata");
        }
        for name in self.data_files {
            backend
                .put(&format!("{}/{name}", self.id), Bytes::from_static(b"data"))
                .await
                .expect("data file");
        }
    }
}

/// Lifecycle event recorded by scripted tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Task body started.
    Started(TaskId),
    /// Task body finished successfully.
    Finished(TaskId),
    /// Restorer `close` ran.
    Closed(TaskId),
}

/// Shared, ordered log of task events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<TaskEvent>>>);

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: TaskEvent) {
        self.0.lock().expect("lock").push(event);
    }

    /// Returns every event in record order.
    pub fn events(&self) -> Vec<TaskEvent> {
        self.0.lock().expect("lock").clone()
    }

    /// Returns the index of the first occurrence of `event`.
    pub fn position(&self, event: &TaskEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Number of times `task` started.
    pub fn starts(&self, task: &TaskId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TaskEvent::Started(t) if t == task))
            .count()
    }
}

/// Behavior of one scripted task.
#[derive(Debug, Clone)]
pub struct TaskScript {
    /// Qualified table name.
    pub name: String,
    /// Time the task body takes.
    pub delay: Duration,
    /// Whether the task body fails.
    pub fail: bool,
}

impl TaskScript {
    /// A table task that succeeds after `delay`.
    pub fn ok(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            fail: false,
        }
    }

    /// A table task that fails after `delay`.
    pub fn failing(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            fail: true,
            ..Self::ok(name, delay)
        }
    }

    /// Task id of this script.
    pub fn task_id(&self) -> TaskId {
        TaskId::new(ObjectKind::Table, &self.name)
    }

    fn filename(&self) -> String {
        format!("{}.dat.gz", self.name)
    }
}

/// `schema` and `table` fields for a `schema.table` name.
fn table_meta(name: &str) -> TaskMeta {
    let (schema, table) = name.split_once('.').unwrap_or(("", name));
    TaskMeta::from([
        ("schema".to_string(), schema.to_string()),
        ("table".to_string(), table.to_string()),
    ])
}

/// Dump task that writes one data file.
pub struct ScriptedDumper {
    script: TaskScript,
    storage: ScopedStorage,
    log: EventLog,
}

impl Task for ScriptedDumper {
    fn debug_info(&self) -> String {
        self.script.task_id().to_string()
    }

    fn meta(&self) -> TaskMeta {
        table_meta(&self.script.name)
    }
}

#[async_trait]
impl Dumper for ScriptedDumper {
    async fn dump(&mut self) -> Result<TaskStat, BoxError> {
        let id = self.script.task_id();
        self.log.record(TaskEvent::Started(id.clone()));
        tokio::time::sleep(self.script.delay).await;
        if self.script.fail {
            return Err(format!("dump of {} failed", self.script.name).into());
        }
        self.storage
            .put_object(&self.script.filename(), Bytes::from(self.script.name.clone()))
            .await?;
        self.log.record(TaskEvent::Finished(id.clone()));
        Ok(TaskStat {
            id,
            kind: ObjectKind::Table,
            object_name: self.script.name.clone(),
            filename: self.script.filename(),
            engine: "postgresql".into(),
            original_size: 100,
            compressed_size: 10,
            record_count: 1,
        })
    }
}

/// Producer returning a fixed set of scripted dump tasks.
#[derive(Default)]
pub struct ScriptedProducer {
    scripts: Vec<TaskScript>,
    depends_on: BTreeMap<TaskId, Vec<TaskId>>,
    warnings: Vec<ValidationWarning>,
    log: EventLog,
}

impl ScriptedProducer {
    /// Creates a producer for `scripts` logging into `log`.
    pub fn new(scripts: Vec<TaskScript>, log: EventLog) -> Self {
        Self {
            scripts,
            log,
            ..Self::default()
        }
    }

    /// Declares that `task` must be restored after `dependency`.
    #[must_use]
    pub fn depends(mut self, task: &str, dependency: &str) -> Self {
        self.depends_on
            .entry(TaskId::new(ObjectKind::Table, task))
            .or_default()
            .push(TaskId::new(ObjectKind::Table, dependency));
        self
    }

    /// Reports `warning` during production.
    #[must_use]
    pub fn warn(mut self, warning: ValidationWarning) -> Self {
        self.warnings.push(warning);
        self
    }
}

#[async_trait]
impl DumpTaskProducer for ScriptedProducer {
    async fn produce(
        &self,
        validation: &ValidationContext,
        storage: &ScopedStorage,
    ) -> Result<(Vec<Box<dyn Dumper>>, shroud_core::metadata::RestorationContext), BoxError> {
        for warning in &self.warnings {
            validation.with_field("producer", "scripted").add(warning.clone());
        }
        let ids: Vec<TaskId> = self.scripts.iter().map(TaskScript::task_id).collect();
        let tasks = self
            .scripts
            .iter()
            .map(|script| {
                Box::new(ScriptedDumper {
                    script: script.clone(),
                    storage: storage.clone(),
                    log: self.log.clone(),
                }) as Box<dyn Dumper>
            })
            .collect();
        Ok((tasks, plan_restoration(&ids, &self.depends_on)))
    }
}

/// Restore task that reads its data file back.
pub struct ScriptedRestorer {
    item: RestorationItem,
    storage: ScopedStorage,
    delay: Duration,
    fail: bool,
    log: EventLog,
}

impl Task for ScriptedRestorer {
    fn debug_info(&self) -> String {
        self.item.task_id.to_string()
    }

    fn meta(&self) -> TaskMeta {
        table_meta(&self.item.object_name)
    }
}

#[async_trait]
impl Restorer for ScriptedRestorer {
    fn task_id(&self) -> &TaskId {
        &self.item.task_id
    }

    async fn restore(&mut self) -> Result<(), BoxError> {
        self.log.record(TaskEvent::Started(self.item.task_id.clone()));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(format!("restore of {} failed", self.item.object_name).into());
        }
        self.storage.get_object(&self.item.filename).await?;
        self.log.record(TaskEvent::Finished(self.item.task_id.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        self.log.record(TaskEvent::Closed(self.item.task_id.clone()));
        Ok(())
    }
}

/// Factory creating [`ScriptedRestorer`]s for table items.
#[derive(Default)]
pub struct ScriptedRestorerFactory {
    delays: BTreeMap<TaskId, Duration>,
    failing: HashSet<TaskId>,
    log: EventLog,
}

impl ScriptedRestorerFactory {
    /// Creates a factory logging into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Makes restoring `table` take `delay`.
    #[must_use]
    pub fn delay(mut self, table: &str, delay: Duration) -> Self {
        self.delays.insert(TaskId::new(ObjectKind::Table, table), delay);
        self
    }

    /// Makes restoring `table` fail.
    #[must_use]
    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(TaskId::new(ObjectKind::Table, table));
        self
    }
}

impl RestorerFactory for ScriptedRestorerFactory {
    fn create(
        &self,
        item: &RestorationItem,
        storage: &ScopedStorage,
    ) -> Result<Option<Box<dyn Restorer>>, BoxError> {
        if item.object_kind != ObjectKind::Table {
            return Ok(None);
        }
        Ok(Some(Box::new(ScriptedRestorer {
            item: item.clone(),
            storage: storage.clone(),
            delay: self.delays.get(&item.task_id).copied().unwrap_or_default(),
            fail: self.failing.contains(&item.task_id),
            log: self.log.clone(),
        })))
    }
}
