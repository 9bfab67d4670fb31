//! Restore runner.
//!
//! Reads `metadata.json` from one dump sub-scope, restores the schema, then
//! restores every item through the worker pool. With `in_order` set and a
//! usable topological order, dispatch goes through [`OrderedProducer`] and
//! each successful task is marked in a [`TaskResolver`] so dependents can
//! start.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use shroud_core::config::Config;
use shroud_core::id::TaskId;
use shroud_core::metadata::Metadata;
use shroud_core::observability::{dump_span, task_span};
use shroud_core::scoped_storage::ScopedStorage;

use crate::error::{BoxError, Error, Result};
use crate::metrics::{self, Direction};
use crate::pool::WorkerPool;
use crate::producer::{OrderedProducer, ProducerSource, UnorderedProducer};
use crate::resolver::TaskResolver;
use crate::task::{Restorer, RestorerFactory, SchemaRestorer};

/// Settings for one restore run.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Parallel restore workers.
    pub jobs: usize,
    /// Dispatch tasks in dependency order.
    pub in_order: bool,
    /// Skip the schema step.
    pub data_only: bool,
    /// How often a blocked dispatch re-checks its dependencies.
    pub dependency_poll_interval: Duration,
}

impl RestoreOptions {
    /// Builds options from the restore section of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            jobs: config.restore.jobs,
            in_order: config.restore.in_order,
            data_only: false,
            dependency_poll_interval: config.restore.dependency_poll_interval,
        }
    }
}

/// Result of a successful restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Tasks restored, in completion order.
    pub restored: Vec<TaskId>,
    /// Whether dispatch followed the dependency order.
    pub ordered: bool,
}

/// Restores one dump.
pub struct RestoreRunner {
    storage: ScopedStorage,
    factory: Arc<dyn RestorerFactory>,
    schema: Option<Arc<dyn SchemaRestorer>>,
    options: RestoreOptions,
}

impl RestoreRunner {
    /// Creates a runner reading from the dump sub-scope `storage`.
    #[must_use]
    pub fn new(storage: ScopedStorage, factory: Arc<dyn RestorerFactory>, options: RestoreOptions) -> Self {
        Self {
            storage,
            factory,
            schema: None,
            options,
        }
    }

    /// Sets the collaborator that restores the schema before data tasks.
    #[must_use]
    pub fn with_schema_restorer(mut self, schema: Arc<dyn SchemaRestorer>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Runs the restore.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be read, the schema step fails,
    /// any task fails, or `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RestoreOutcome> {
        let span = dump_span("restore", self.storage.dirname());
        let result = self.run_inner(cancel).instrument(span).await;
        metrics::record_run(Direction::Restore, result.is_ok());
        if let Err(err) = &result {
            tracing::error!(error = %err, "restore failed");
        }
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<RestoreOutcome> {
        let metadata = Metadata::read(&self.storage).await?;
        let dump_stat = &metadata.dump_stat;
        tracing::info!(
            tasks = dump_stat.restoration_items.len(),
            jobs = self.options.jobs,
            "restore started"
        );

        if !self.options.data_only {
            if let Some(schema) = &self.schema {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::cancelled("restoring schema")),
                    restored = schema.restore_schema(&self.storage) => {
                        restored.map_err(|source| Error::Schema { operation: "restore", source })?;
                    }
                }
            }
        }

        let ordered = self.options.in_order && dump_stat.restoration_context.has_topological_order;
        if self.options.in_order && !ordered {
            tracing::warn!("dump has no topological order; restoring without dependency ordering");
        }

        let resolver = Arc::new(TaskResolver::new());
        let work = {
            let resolver = Arc::clone(&resolver);
            move |worker_id: usize, task: Box<dyn Restorer>, cancel: CancellationToken| {
                run_restore_task(worker_id, task, Arc::clone(&resolver), cancel)
            }
        };
        let pool = WorkerPool::new(self.options.jobs);
        let restored = if ordered {
            let producer = OrderedProducer::new(
                dump_stat,
                Arc::clone(&self.factory),
                self.storage.clone(),
                resolver,
                self.options.dependency_poll_interval,
            );
            pool.run_cooperative(ProducerSource(producer), cancel, work).await?
        } else {
            let producer = UnorderedProducer::new(dump_stat, Arc::clone(&self.factory), self.storage.clone());
            pool.run_cooperative(ProducerSource(producer), cancel, work).await?
        };

        tracing::info!(tasks = restored.len(), "restore completed");
        Ok(RestoreOutcome { restored, ordered })
    }
}

async fn run_restore_task(
    worker_id: usize,
    mut task: Box<dyn Restorer>,
    resolver: Arc<TaskResolver>,
    cancel: CancellationToken,
) -> Result<TaskId> {
    let name = task.debug_info();
    let meta = task.meta();
    let task_id = task.task_id().clone();
    let started = Instant::now();
    let result = restore_one(task.as_mut(), &cancel)
        .instrument(task_span("restore", &name, &meta))
        .await;
    match result {
        Ok(()) => {
            metrics::record_task(Direction::Restore, true, started.elapsed());
            resolver.set_task_completed(task_id.clone());
            tracing::debug!(worker_id, task = %name, ?meta, "task restored");
            Ok(task_id)
        }
        Err(None) => Err(Error::cancelled("restoring task")),
        Err(Some(source)) => {
            metrics::record_task(Direction::Restore, false, started.elapsed());
            tracing::error!(worker_id, task = %name, ?meta, error = %source, "task failed");
            Err(Error::TaskFailed { task: name, meta, source })
        }
    }
}

/// Runs `init`, `restore`, then `close`.
///
/// `close` follows every successful `init`, also when `restore` failed or was
/// interrupted by `cancel`. `Err(None)` means the run was cancelled.
async fn restore_one(
    task: &mut dyn Restorer,
    cancel: &CancellationToken,
) -> std::result::Result<(), Option<BoxError>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(None),
        initialized = task.init() => initialized.map_err(Some)?,
    }
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(None),
        restored = task.restore() => restored.map_err(Some),
    };
    if let Err(err) = task.close().await {
        tracing::warn!(task = %task.debug_info(), error = %err, "closing restorer failed");
    }
    result
}
