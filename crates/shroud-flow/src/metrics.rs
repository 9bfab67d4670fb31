//! Metrics for dump and restore execution.
//!
//! Recorded through the `metrics` crate facade; nothing is exported unless
//! the binary installs a recorder.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `shroud_flow_tasks_total` | Counter | `direction`, `result` |
//! | `shroud_flow_task_duration_seconds` | Histogram | `direction` |
//! | `shroud_flow_heartbeat_writes_total` | Counter | `status`, `result` |
//! | `shroud_flow_runs_total` | Counter | `direction`, `result` |

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: tasks finished, by direction and result.
    pub const TASKS_TOTAL: &str = "shroud_flow_tasks_total";
    /// Histogram: task execution time in seconds.
    pub const TASK_DURATION_SECONDS: &str = "shroud_flow_task_duration_seconds";
    /// Counter: heartbeat writes, by status and result.
    pub const HEARTBEAT_WRITES_TOTAL: &str = "shroud_flow_heartbeat_writes_total";
    /// Counter: completed runs, by direction and result.
    pub const RUNS_TOTAL: &str = "shroud_flow_runs_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// `dump` or `restore`.
    pub const DIRECTION: &str = "direction";
    /// `success` or `failure`.
    pub const RESULT: &str = "result";
    /// Heartbeat status written.
    pub const STATUS: &str = "status";
}

/// Whether work moves data out of or into the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Database to storage.
    Dump,
    /// Storage to database.
    Restore,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Dump => "dump",
            Self::Restore => "restore",
        }
    }
}

const fn result_label(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}

/// Records a finished task.
pub fn record_task(direction: Direction, ok: bool, elapsed: Duration) {
    counter!(
        names::TASKS_TOTAL,
        labels::DIRECTION => direction.as_str(),
        labels::RESULT => result_label(ok),
    )
    .increment(1);
    histogram!(
        names::TASK_DURATION_SECONDS,
        labels::DIRECTION => direction.as_str(),
    )
    .record(elapsed.as_secs_f64());
}

/// Records a heartbeat write attempt.
pub fn record_heartbeat_write(status: &'static str, ok: bool) {
    counter!(
        names::HEARTBEAT_WRITES_TOTAL,
        labels::STATUS => status,
        labels::RESULT => result_label(ok),
    )
    .increment(1);
}

/// Records a finished dump or restore run.
pub fn record_run(direction: Direction, ok: bool) {
    counter!(
        names::RUNS_TOTAL,
        labels::DIRECTION => direction.as_str(),
        labels::RESULT => result_label(ok),
    )
    .increment(1);
}
