//! Dump runner.
//!
//! One run allocates a fresh dump sub-scope, starts the heartbeat worker,
//! produces tasks, dumps the schema, fans data tasks out over the worker
//! pool, and writes `metadata.json` once every task succeeded. The heartbeat
//! is finalized as `done` only after metadata is persisted, so a `done` dump
//! always has metadata.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use shroud_core::config::{Config, HeartbeatConfig};
use shroud_core::heartbeat::HeartbeatWriter;
use shroud_core::id::DumpId;
use shroud_core::metadata::{DumpStat, Metadata, TaskStat};
use shroud_core::observability::{dump_span, task_span};
use shroud_core::scoped_storage::ScopedStorage;

use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatWorker;
use crate::metrics::{self, Direction};
use crate::pool::WorkerPool;
use crate::task::{DumpTaskProducer, Dumper, SchemaDumper};
use crate::validation::{ValidationContext, ValidationWarning};

/// Settings for one dump run.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Database engine recorded in metadata.
    pub engine: String,
    /// Database name recorded in metadata.
    pub database_name: String,
    /// Parallel dump workers.
    pub jobs: usize,
    /// Skip the schema step.
    pub data_only: bool,
    /// Free-form description recorded in metadata.
    pub description: String,
    /// Tags recorded in metadata.
    pub tags: Vec<String>,
    /// Transformation configuration recorded in metadata.
    pub transformers: Vec<serde_json::Value>,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
}

impl DumpOptions {
    /// Builds options from the dump and heartbeat sections of `config`.
    #[must_use]
    pub fn from_config(engine: impl Into<String>, database_name: impl Into<String>, config: &Config) -> Self {
        Self {
            engine: engine.into(),
            database_name: database_name.into(),
            jobs: config.dump.jobs,
            data_only: false,
            description: config.dump.description.clone(),
            tags: config.dump.tags.clone(),
            transformers: Vec::new(),
            heartbeat: config.heartbeat.clone(),
        }
    }
}

/// Result of a successful dump.
#[derive(Debug, Clone)]
pub struct DumpOutcome {
    /// The dump that was written.
    pub dump_id: DumpId,
    /// Metadata as persisted.
    pub metadata: Metadata,
    /// Non-fatal validation warnings.
    pub warnings: Vec<ValidationWarning>,
}

/// Executes dumps into a storage root.
pub struct DumpRunner {
    storage: ScopedStorage,
    producer: Arc<dyn DumpTaskProducer>,
    schema: Option<Arc<dyn SchemaDumper>>,
    options: DumpOptions,
}

impl DumpRunner {
    /// Creates a runner writing dumps under `storage`.
    #[must_use]
    pub fn new(storage: ScopedStorage, producer: Arc<dyn DumpTaskProducer>, options: DumpOptions) -> Self {
        Self {
            storage,
            producer,
            schema: None,
            options,
        }
    }

    /// Sets the collaborator that dumps the schema before data tasks.
    #[must_use]
    pub fn with_schema_dumper(mut self, schema: Arc<dyn SchemaDumper>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Runs a dump under a newly generated id.
    ///
    /// # Errors
    ///
    /// See [`Self::run_as`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DumpOutcome> {
        self.run_as(DumpId::generate(), cancel).await
    }

    /// Runs a dump under `dump_id`.
    ///
    /// On success the heartbeat is finalized as `done`, even if `cancel`
    /// fired after the last task finished. On failure it is finalized as
    /// `failed`, unless the run was cut short by `cancel`: then the worker
    /// stops without a terminal write and the dump later reads as failed
    /// once stale.
    ///
    /// # Errors
    ///
    /// Returns the first task failure, a producer or schema error, a
    /// validation error, a heartbeat write error, or cancellation.
    pub async fn run_as(&self, dump_id: DumpId, cancel: &CancellationToken) -> Result<DumpOutcome> {
        let span = dump_span("dump", dump_id.as_str());
        let result = self.run_inner(dump_id, cancel).instrument(span).await;
        metrics::record_run(Direction::Dump, result.is_ok());
        result
    }

    async fn run_inner(&self, dump_id: DumpId, cancel: &CancellationToken) -> Result<DumpOutcome> {
        let scope = self.storage.sub_storage(dump_id.as_str(), true)?;
        let run = cancel.child_token();
        let heartbeat = HeartbeatWorker::new(
            dump_id.clone(),
            HeartbeatWriter::new(scope.clone()),
            &self.options.heartbeat,
        )
        .spawn(cancel.clone(), run.clone());

        tracing::info!(jobs = self.options.jobs, "dump started");
        let started_at = Utc::now();
        let validation = ValidationContext::new().with_field("dump_id", dump_id.as_str());

        match self.execute(&scope, &validation, started_at, &run).await {
            Ok(metadata) => {
                heartbeat.complete().await?;
                tracing::info!(
                    tasks = metadata.dump_stat.task_stats.len(),
                    original_size = metadata.original_size,
                    compressed_size = metadata.compressed_size,
                    "dump completed"
                );
                Ok(DumpOutcome {
                    dump_id,
                    metadata,
                    warnings: validation.warnings(),
                })
            }
            Err(err) => {
                tracing::error!(error = %err, "dump failed");
                let finalized = if err.is_cancelled() && cancel.is_cancelled() {
                    heartbeat.abandon().await
                } else {
                    heartbeat.fail().await
                };
                match finalized {
                    // A failed heartbeat write cancels the run; report the cause.
                    Err(hb_err) if err.is_cancelled() => Err(hb_err),
                    Err(hb_err) => {
                        tracing::warn!(error = %hb_err, "could not mark dump as failed");
                        Err(err)
                    }
                    Ok(()) => Err(err),
                }
            }
        }
    }

    async fn execute(
        &self,
        scope: &ScopedStorage,
        validation: &ValidationContext,
        started_at: DateTime<Utc>,
        run: &CancellationToken,
    ) -> Result<Metadata> {
        let (tasks, restoration_context) = tokio::select! {
            biased;
            () = run.cancelled() => return Err(Error::cancelled("producing tasks")),
            produced = self.producer.produce(validation, scope) => {
                produced.map_err(|source| Error::TaskProduction { source })?
            }
        };
        for warning in validation.warnings() {
            tracing::warn!(severity = ?warning.severity, meta = ?warning.meta, "{}", warning.msg);
        }
        let errors = validation.fatal_count();
        if errors > 0 {
            return Err(Error::Validation { errors });
        }
        tracing::debug!(tasks = tasks.len(), "tasks produced");

        if !self.options.data_only {
            if let Some(schema) = &self.schema {
                tokio::select! {
                    biased;
                    () = run.cancelled() => return Err(Error::cancelled("dumping schema")),
                    dumped = schema.dump_schema(scope) => {
                        dumped.map_err(|source| Error::Schema { operation: "dump", source })?;
                    }
                }
            }
        }

        let pool = WorkerPool::new(self.options.jobs);
        let stats = pool.run(tasks.into_iter(), run, run_dump_task).await?;

        let completed_at = Utc::now();
        let metadata = Metadata {
            engine: self.options.engine.clone(),
            database_name: self.options.database_name.clone(),
            started_at,
            completed_at,
            original_size: stats.iter().map(|s| s.original_size).sum(),
            compressed_size: stats.iter().map(|s| s.compressed_size).sum(),
            transformers: self.options.transformers.clone(),
            description: self.options.description.clone(),
            tags: self.options.tags.clone(),
            dump_stat: DumpStat::new(restoration_context, stats),
        };
        metadata.write(scope).await?;
        Ok(metadata)
    }
}

async fn run_dump_task(worker_id: usize, mut task: Box<dyn Dumper>) -> Result<TaskStat> {
    let name = task.debug_info();
    let meta = task.meta();
    let started = Instant::now();
    let result = task.dump().instrument(task_span("dump", &name, &meta)).await;
    metrics::record_task(Direction::Dump, result.is_ok(), started.elapsed());
    match result {
        Ok(stat) => {
            tracing::debug!(worker_id, task = %name, ?meta, records = stat.record_count, "task dumped");
            Ok(stat)
        }
        Err(source) => {
            tracing::error!(worker_id, task = %name, ?meta, error = %source, "task failed");
            Err(Error::TaskFailed { task: name, meta, source })
        }
    }
}
