//! Units of work and the collaborators that produce them.
//!
//! DBMS-specific code plugs in here: a [`DumpTaskProducer`] turns an
//! introspected database into [`Dumper`]s, a [`RestorerFactory`] turns stored
//! [`RestorationItem`]s back into [`Restorer`]s. The execution core only sees
//! these traits.

use async_trait::async_trait;
use std::collections::BTreeMap;

use shroud_core::id::TaskId;
use shroud_core::metadata::{RestorationContext, RestorationItem, TaskStat};
use shroud_core::scoped_storage::ScopedStorage;

use crate::error::BoxError;
use crate::validation::ValidationContext;

/// Structured fields describing a task, for logs and warnings.
pub type TaskMeta = BTreeMap<String, String>;

/// Identity shared by every unit of work.
pub trait Task: Send {
    /// Stable, side-effect free identity used in logs and errors.
    fn debug_info(&self) -> String;

    /// Structured description of the task.
    fn meta(&self) -> TaskMeta {
        TaskMeta::new()
    }
}

/// A unit of work that dumps one object into the dump sub-scope.
#[async_trait]
pub trait Dumper: Task {
    /// Dumps the object and reports what was written.
    async fn dump(&mut self) -> Result<TaskStat, BoxError>;
}

/// A unit of work that restores one dumped object.
///
/// The executing worker calls `init`, `restore`, then `close`. Once `init`
/// succeeded, `close` runs even when `restore` failed or the run was
/// cancelled while it was restoring.
#[async_trait]
pub trait Restorer: Task {
    /// Identity in the restore dependency graph.
    fn task_id(&self) -> &TaskId;

    /// Prepares resources (connections, readers).
    async fn init(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Restores the object.
    async fn restore(&mut self) -> Result<(), BoxError>;

    /// Releases resources.
    async fn close(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Builds the dump task list for one run.
#[async_trait]
pub trait DumpTaskProducer: Send + Sync {
    /// Produces the tasks and the restore ordering of their outputs.
    ///
    /// Tasks write into `storage`, the dump's own sub-scope. Non-fatal
    /// problems go to `validation`; returning an error aborts the run.
    async fn produce(
        &self,
        validation: &ValidationContext,
        storage: &ScopedStorage,
    ) -> Result<(Vec<Box<dyn Dumper>>, RestorationContext), BoxError>;
}

/// Materializes a restorer for a stored item.
pub trait RestorerFactory: Send + Sync {
    /// Creates the restorer for `item`, reading from the dump sub-scope `storage`.
    ///
    /// Returns `Ok(None)` for object kinds this factory does not handle.
    fn create(
        &self,
        item: &RestorationItem,
        storage: &ScopedStorage,
    ) -> Result<Option<Box<dyn Restorer>>, BoxError>;
}

/// Dumps schema (DDL) before any data task runs.
#[async_trait]
pub trait SchemaDumper: Send + Sync {
    /// Writes the schema into the dump sub-scope.
    async fn dump_schema(&self, storage: &ScopedStorage) -> Result<(), BoxError>;
}

/// Restores schema (DDL) before any data task runs.
#[async_trait]
pub trait SchemaRestorer: Send + Sync {
    /// Restores the schema from the dump sub-scope.
    async fn restore_schema(&self, storage: &ScopedStorage) -> Result<(), BoxError>;
}
