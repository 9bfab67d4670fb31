//! Completion tracking for dependency-ordered restore.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use shroud_core::id::TaskId;

/// Set of restore tasks that finished successfully during one run.
///
/// Shared by the ordered producer (reader) and all restore workers
/// (writers). The set only grows; it is discarded with the run.
#[derive(Debug, Default)]
pub struct TaskResolver {
    completed: RwLock<HashSet<TaskId>>,
}

impl TaskResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `task` as completed.
    pub fn set_task_completed(&self, task: TaskId) {
        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task);
    }

    /// Returns true if `task` was marked completed.
    #[must_use]
    pub fn is_task_completed(&self, task: &TaskId) -> bool {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task)
    }

    /// Returns true if every task in `tasks` was marked completed.
    #[must_use]
    pub fn all_completed(&self, tasks: &[TaskId]) -> bool {
        let completed = self
            .completed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.iter().all(|t| completed.contains(t))
    }

    /// Number of completed tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
