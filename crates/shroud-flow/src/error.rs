//! Error types for dump and restore execution.

use std::time::Duration;

use shroud_core::id::{DumpId, ObjectKind, TaskId};

use crate::task::TaskMeta;

/// Boxed error returned by task bodies and external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The result type used throughout shroud-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a dump or restore.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A unit of work failed. Fatal to the run.
    #[error("task {task} failed")]
    TaskFailed {
        /// Debug identity of the failing task.
        task: String,
        /// Descriptive metadata of the failing task.
        meta: TaskMeta,
        /// What the task reported.
        #[source]
        source: BoxError,
    },

    /// The producer could not build the task list.
    #[error("produce tasks failed")]
    TaskProduction {
        /// What the producer reported.
        #[source]
        source: BoxError,
    },

    /// The schema dump or restore step failed.
    #[error("schema {operation} failed")]
    Schema {
        /// `dump` or `restore`.
        operation: &'static str,
        /// What the schema collaborator reported.
        #[source]
        source: BoxError,
    },

    /// Validation produced at least one error-severity warning.
    #[error("validation failed with {errors} fatal warning(s)")]
    Validation {
        /// Number of error-severity warnings.
        errors: usize,
    },

    /// The run stopped because it was cancelled, either by the caller or
    /// because a sibling failed first.
    #[error("cancelled while {during}")]
    Cancelled {
        /// What was in progress when cancellation was observed.
        during: &'static str,
    },

    /// Writing the dump heartbeat failed.
    #[error("heartbeat write for dump {dump_id} failed")]
    Heartbeat {
        /// Dump whose heartbeat could not be written.
        dump_id: DumpId,
        /// The storage error.
        #[source]
        source: shroud_core::Error,
    },

    /// A heartbeat write did not finish within the write timeout.
    #[error("heartbeat write for dump {dump_id} timed out after {timeout:?}")]
    HeartbeatTimeout {
        /// Dump whose heartbeat could not be written.
        dump_id: DumpId,
        /// The configured write timeout.
        timeout: Duration,
    },

    /// The restoration order names a task that has no restoration item.
    #[error("no restoration item for task {task_id}")]
    MissingRestorationItem {
        /// The task without an item.
        task_id: TaskId,
    },

    /// No restorer exists for an object kind.
    #[error("unsupported object kind {kind} for task {task_id}")]
    UnsupportedObjectKind {
        /// The unsupported kind.
        kind: ObjectKind,
        /// The task that carried it.
        task_id: TaskId,
    },

    /// A cycle was detected in the dependency graph.
    #[error("cycle detected in dependency graph: {cycle:?}")]
    CycleDetected {
        /// Task IDs on (or feeding) the cycle.
        cycle: Vec<String>,
    },

    /// A DAG node was not found (internal graph operation error).
    #[error("DAG node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier (index or value).
        node: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// An error from shroud-core.
    #[error("core error: {0}")]
    Core(#[from] shroud_core::Error),
}

impl Error {
    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled(during: &'static str) -> Self {
        Self::Cancelled { during }
    }

    /// Returns true if this error only reports cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
