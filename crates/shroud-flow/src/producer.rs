//! Restore task producers.
//!
//! A producer is an iterator over restorers: [`RestoreTaskProducer::next`]
//! advances, [`RestoreTaskProducer::task`] materializes the restorer at the
//! cursor, and [`RestoreTaskProducer::take_err`] reports why iteration stopped
//! early. [`ProducerSource`] adapts any producer to the worker pool.
//!
//! [`OrderedProducer`] yields a task only once every dependency is marked
//! completed in the shared [`TaskResolver`]. It polls rather than waiting on
//! a notification, so each dependency edge adds at most one poll interval.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use shroud_core::id::TaskId;
use shroud_core::metadata::{DumpStat, RestorationContext, RestorationItem};
use shroud_core::scoped_storage::ScopedStorage;

use crate::error::{Error, Result};
use crate::pool::TaskSource;
use crate::resolver::TaskResolver;
use crate::task::{Restorer, RestorerFactory};

/// Iterator-style source of restore tasks.
#[async_trait]
pub trait RestoreTaskProducer: Send {
    /// Advances to the next task. Returns false when exhausted or when an
    /// error stopped iteration; check [`Self::take_err`] to tell them apart.
    async fn next(&mut self, cancel: &CancellationToken) -> bool;

    /// Materializes the restorer at the current position.
    ///
    /// # Errors
    ///
    /// Fails if the task has no restoration item, its kind is unsupported,
    /// or the factory fails.
    fn task(&mut self) -> Result<Box<dyn Restorer>>;

    /// Error that ended iteration, if any.
    fn take_err(&mut self) -> Option<Error>;
}

/// Shared by both producers: item lookup plus the factory call.
struct Materializer {
    items: BTreeMap<TaskId, RestorationItem>,
    factory: Arc<dyn RestorerFactory>,
    storage: ScopedStorage,
}

impl Materializer {
    fn create(&self, task_id: &TaskId) -> Result<Box<dyn Restorer>> {
        let item = self
            .items
            .get(task_id)
            .ok_or_else(|| Error::MissingRestorationItem {
                task_id: task_id.clone(),
            })?;
        self.factory
            .create(item, &self.storage)
            .map_err(|source| Error::TaskProduction { source })?
            .ok_or_else(|| Error::UnsupportedObjectKind {
                kind: item.object_kind,
                task_id: task_id.clone(),
            })
    }
}

/// Yields every restoration item with no ordering constraint.
pub struct UnorderedProducer {
    materializer: Materializer,
    pending: std::vec::IntoIter<TaskId>,
    current: Option<TaskId>,
}

impl UnorderedProducer {
    /// Creates a producer over all items in `dump_stat`.
    #[must_use]
    pub fn new(
        dump_stat: &DumpStat,
        factory: Arc<dyn RestorerFactory>,
        storage: ScopedStorage,
    ) -> Self {
        let pending: Vec<TaskId> = dump_stat.restoration_items.keys().cloned().collect();
        Self {
            materializer: Materializer {
                items: dump_stat.restoration_items.clone(),
                factory,
                storage,
            },
            pending: pending.into_iter(),
            current: None,
        }
    }
}

#[async_trait]
impl RestoreTaskProducer for UnorderedProducer {
    async fn next(&mut self, _cancel: &CancellationToken) -> bool {
        self.current = self.pending.next();
        self.current.is_some()
    }

    fn task(&mut self) -> Result<Box<dyn Restorer>> {
        let task_id = self.current.as_ref().ok_or_else(|| Error::Internal {
            message: "task() called before next()".into(),
        })?;
        self.materializer.create(task_id)
    }

    fn take_err(&mut self) -> Option<Error> {
        None
    }
}

/// Yields tasks in restoration order, each only after its dependencies
/// have completed.
pub struct OrderedProducer {
    materializer: Materializer,
    context: RestorationContext,
    resolver: Arc<TaskResolver>,
    poll_interval: Duration,
    cursor: usize,
    current: Option<TaskId>,
    err: Option<Error>,
}

impl OrderedProducer {
    /// Creates a producer following `dump_stat`'s restoration context.
    ///
    /// Workers must call [`TaskResolver::set_task_completed`] on `resolver`
    /// after each successful restore, or dependents never start.
    #[must_use]
    pub fn new(
        dump_stat: &DumpStat,
        factory: Arc<dyn RestorerFactory>,
        storage: ScopedStorage,
        resolver: Arc<TaskResolver>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            materializer: Materializer {
                items: dump_stat.restoration_items.clone(),
                factory,
                storage,
            },
            context: dump_stat.restoration_context.clone(),
            resolver,
            poll_interval,
            cursor: 0,
            current: None,
            err: None,
        }
    }
}

#[async_trait]
impl RestoreTaskProducer for OrderedProducer {
    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if self.err.is_some() {
            return false;
        }
        let Some(task_id) = self.context.restoration_order.get(self.cursor).cloned() else {
            self.current = None;
            return false;
        };
        self.cursor += 1;

        let deps = self.context.dependencies_of(&task_id);
        let mut waited = false;
        while !self.resolver.all_completed(deps) {
            if !waited {
                tracing::debug!(task = %task_id, dependencies = deps.len(), "waiting for dependencies");
                waited = true;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.err = Some(Error::cancelled("waiting for dependencies"));
                    self.current = None;
                    return false;
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.current = Some(task_id);
        true
    }

    fn task(&mut self) -> Result<Box<dyn Restorer>> {
        let task_id = self.current.as_ref().ok_or_else(|| Error::Internal {
            message: "task() called before next()".into(),
        })?;
        self.materializer.create(task_id)
    }

    fn take_err(&mut self) -> Option<Error> {
        self.err.take()
    }
}

/// Adapts a [`RestoreTaskProducer`] to the worker pool's [`TaskSource`].
pub struct ProducerSource<P>(pub P);

#[async_trait]
impl<P: RestoreTaskProducer> TaskSource<Box<dyn Restorer>> for ProducerSource<P> {
    async fn next_task(&mut self, cancel: &CancellationToken) -> Result<Option<Box<dyn Restorer>>> {
        if self.0.next(cancel).await {
            return self.0.task().map(Some);
        }
        match self.0.take_err() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::task::Task;
    use shroud_core::id::ObjectKind;
    use shroud_core::storage::MemoryBackend;

    struct Noop(TaskId);

    impl Task for Noop {
        fn debug_info(&self) -> String {
            self.0.to_string()
        }
    }

    #[async_trait]
    impl Restorer for Noop {
        fn task_id(&self) -> &TaskId {
            &self.0
        }

        async fn restore(&mut self) -> std::result::Result<(), BoxError> {
            Ok(())
        }
    }

    struct TablesOnly;

    impl RestorerFactory for TablesOnly {
        fn create(
            &self,
            item: &RestorationItem,
            _storage: &ScopedStorage,
        ) -> std::result::Result<Option<Box<dyn Restorer>>, BoxError> {
            Ok((item.object_kind == ObjectKind::Table)
                .then(|| Box::new(Noop(item.task_id.clone())) as Box<dyn Restorer>))
        }
    }

    fn item(kind: ObjectKind, name: &str) -> RestorationItem {
        RestorationItem {
            task_id: TaskId::new(kind, name),
            filename: format!("{name}.dat.gz"),
            engine: "postgresql".into(),
            object_kind: kind,
            object_name: name.into(),
            record_count: 1,
        }
    }

    fn dump_stat(items: Vec<RestorationItem>, context: RestorationContext) -> DumpStat {
        DumpStat {
            restoration_context: context,
            task_stats: BTreeMap::new(),
            restoration_items: items.into_iter().map(|i| (i.task_id.clone(), i)).collect(),
        }
    }

    fn storage() -> ScopedStorage {
        ScopedStorage::root(Arc::new(MemoryBackend::new()))
    }

    fn ordered(stat: &DumpStat, resolver: Arc<TaskResolver>) -> OrderedProducer {
        OrderedProducer::new(stat, Arc::new(TablesOnly), storage(), resolver, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn unordered_yields_every_item() {
        let stat = dump_stat(
            vec![item(ObjectKind::Table, "a"), item(ObjectKind::Table, "b")],
            RestorationContext::default(),
        );
        let mut source = ProducerSource(UnorderedProducer::new(&stat, Arc::new(TablesOnly), storage()));
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        while let Some(task) = source.next_task(&cancel).await.expect("next") {
            seen.push(task.task_id().clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn unsupported_kind_is_an_error() {
        let stat = dump_stat(vec![item(ObjectKind::LargeObject, "blobs")], RestorationContext::default());
        let mut source = ProducerSource(UnorderedProducer::new(&stat, Arc::new(TablesOnly), storage()));

        let err = source
            .next_task(&CancellationToken::new())
            .await
            .err().expect("unsupported");
        assert!(matches!(err, Error::UnsupportedObjectKind { kind: ObjectKind::LargeObject, .. }));
    }

    #[tokio::test]
    async fn ordered_waits_for_dependencies() {
        let (a, b) = (item(ObjectKind::Table, "a"), item(ObjectKind::Table, "b"));
        let context = RestorationContext {
            has_topological_order: true,
            restoration_order: vec![a.task_id.clone(), b.task_id.clone()],
            dependencies: BTreeMap::from([(b.task_id.clone(), vec![a.task_id.clone()])]),
        };
        let stat = dump_stat(vec![a.clone(), b.clone()], context);
        let resolver = Arc::new(TaskResolver::new());
        let mut producer = ordered(&stat, Arc::clone(&resolver));
        let cancel = CancellationToken::new();

        assert!(producer.next(&cancel).await);
        assert_eq!(producer.task().expect("a").task_id(), &a.task_id);

        let blocked =
            tokio::time::timeout(Duration::from_millis(30), producer.next(&cancel)).await;
        assert!(blocked.is_err(), "b must wait for a");

        resolver.set_task_completed(a.task_id.clone());
        assert!(producer.next(&cancel).await);
        assert_eq!(producer.task().expect("b").task_id(), &b.task_id);
        assert!(!producer.next(&cancel).await);
        assert!(producer.take_err().is_none());
    }

    #[tokio::test]
    async fn ordered_reports_cancellation_while_waiting() {
        let (a, b) = (item(ObjectKind::Table, "a"), item(ObjectKind::Table, "b"));
        let context = RestorationContext {
            has_topological_order: true,
            restoration_order: vec![b.task_id.clone()],
            dependencies: BTreeMap::from([(b.task_id.clone(), vec![a.task_id.clone()])]),
        };
        let stat = dump_stat(vec![a, b], context);
        let mut source = ProducerSource(ordered(&stat, Arc::new(TaskResolver::new())));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = source.next_task(&cancel).await.err().expect("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn ordered_rejects_task_without_item() {
        let ghost = TaskId::new(ObjectKind::Table, "ghost");
        let context = RestorationContext {
            has_topological_order: true,
            restoration_order: vec![ghost.clone()],
            dependencies: BTreeMap::new(),
        };
        let stat = dump_stat(Vec::new(), context);
        let mut source = ProducerSource(ordered(&stat, Arc::new(TaskResolver::new())));

        let err = source
            .next_task(&CancellationToken::new())
            .await
            .err().expect("missing");
        assert!(matches!(err, Error::MissingRestorationItem { task_id } if task_id == ghost));
    }
}
