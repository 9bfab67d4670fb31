//! Retention engine: selects dumps under one policy and deletes them.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use shroud_core::scoped_storage::ScopedStorage;

use crate::error::{CatalogError, Result};
use crate::gc::{DeleteMode, DeleteOptions};
use crate::listing::{DumpInfo, inspect_dump, sorted_dumps_with_statuses};
use crate::metrics;

/// Outcome of one retention run.
#[derive(Debug, Clone)]
pub struct RetentionReport {
    /// Policy that was applied.
    pub mode: DeleteMode,
    /// Whether deletion was skipped.
    pub dry_run: bool,
    /// Dumps selected for deletion, in deletion order.
    pub selected: Vec<DumpInfo>,
    /// Objects removed from storage (zero on dry run).
    pub objects_deleted: usize,
}

/// Applies deletion policies to the dumps under a storage root.
pub struct RetentionEngine {
    storage: ScopedStorage,
    stale_after: Duration,
}

impl RetentionEngine {
    /// Creates an engine over `storage`, reading `in-progress` heartbeats
    /// older than `stale_after` as failed.
    #[must_use]
    pub fn new(storage: ScopedStorage, stale_after: Duration) -> Self {
        Self {
            storage,
            stale_after,
        }
    }

    /// Runs the policy described by `options` at the current time.
    ///
    /// # Errors
    ///
    /// See [`RetentionEngine::run_at`].
    pub async fn run(&self, options: &DeleteOptions) -> Result<RetentionReport> {
        self.run_at(options, Utc::now()).await
    }

    /// Runs the policy described by `options`, evaluating ages at `now`.
    ///
    /// Options are validated before storage is touched. Deletion stops at the
    /// first failing dump.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOptions` for a bad request, `DumpNotFound` for an
    /// unknown dump id, or the storage error that stopped the run.
    pub async fn run_at(&self, options: &DeleteOptions, now: DateTime<Utc>) -> Result<RetentionReport> {
        let mode = options.mode()?;
        let start = Instant::now();
        tracing::info!(mode = %mode, dry_run = options.dry_run, "applying retention policy");

        let selected = self.select(&mode, now).await?;
        let mut objects_deleted = 0;
        for info in &selected {
            objects_deleted += self.delete_dump(info, options.dry_run).await?;
            metrics::record_deleted(mode.name(), options.dry_run);
        }

        tracing::info!(
            mode = %mode,
            dry_run = options.dry_run,
            dumps = selected.len(),
            objects_deleted,
            duration_secs = start.elapsed().as_secs_f64(),
            "retention policy applied"
        );
        Ok(RetentionReport {
            mode,
            dry_run: options.dry_run,
            selected,
            objects_deleted,
        })
    }

    async fn select(&self, mode: &DeleteMode, now: DateTime<Utc>) -> Result<Vec<DumpInfo>> {
        if let DeleteMode::DumpId(dump_id) = mode {
            let (_, dumps) = self.storage.list_dir().await?;
            let scope = dumps
                .iter()
                .find(|scope| scope.dirname() == dump_id)
                .ok_or_else(|| CatalogError::DumpNotFound {
                    dump_id: dump_id.clone(),
                })?;
            return Ok(vec![inspect_dump(scope, self.stale_after, now).await]);
        }

        let response = sorted_dumps_with_statuses(&self.storage, self.stale_after, now).await?;
        let selected = match mode {
            DeleteMode::RetainFor(keep) => {
                let keep = chrono::Duration::from_std(*keep).unwrap_or(chrono::Duration::MAX);
                response
                    .valid
                    .into_iter()
                    .filter(|d| d.date.is_some_and(|date| now - date >= keep))
                    .collect()
            }
            DeleteMode::RetainRecent(n) => response.valid.into_iter().skip(*n).collect(),
            DeleteMode::PruneFailed { include_unsafe } => {
                let mut selected = response.failed;
                if *include_unsafe {
                    selected.extend(response.unknown_or_failed);
                }
                selected
            }
            DeleteMode::BeforeDate(before) => response
                .valid
                .into_iter()
                .filter(|d| d.date.is_some_and(|date| date < *before))
                .collect(),
            DeleteMode::DumpId(_) => Vec::new(),
        };
        Ok(selected)
    }

    /// The only place a dump is removed; dry run branches here.
    async fn delete_dump(&self, info: &DumpInfo, dry_run: bool) -> Result<usize> {
        tracing::info!(
            dump_id = %info.dump_id,
            date = ?info.date,
            database = info.database.as_deref().unwrap_or(""),
            status = %info.status,
            dry_run,
            "deleting dump"
        );
        if dry_run {
            return Ok(0);
        }
        self.storage
            .delete_all(&info.dump_id)
            .await
            .map_err(|source| CatalogError::Delete {
                dump_id: info.dump_id.clone(),
                source,
            })
    }
}
