//! Catalog metrics.

use metrics::{counter, describe_counter};

/// Dumps deleted (or selected, on dry run) by retention.
pub const DUMPS_DELETED: &str = "shroud_catalog_dumps_deleted_total";

/// Registers all catalog metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(DUMPS_DELETED, "Total dumps deleted by retention");
}

/// Records one dump removed by retention.
pub fn record_deleted(mode: &'static str, dry_run: bool) {
    let dry_run = if dry_run { "true" } else { "false" };
    counter!(DUMPS_DELETED, "mode" => mode, "dry_run" => dry_run).increment(1);
}
