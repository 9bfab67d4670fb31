//! Background worker that keeps a dump's heartbeat fresh.
//!
//! Lifecycle:
//! 1. [`HeartbeatWorker::spawn`] writes `in-progress` immediately.
//! 2. Every `interval` it rewrites `in-progress` to refresh the update time.
//! 3. [`HeartbeatHandle::complete`] or [`HeartbeatHandle::fail`] stops the
//!    worker, waits for it, then writes the terminal status. The terminal
//!    write happens even if `shutdown` already fired, so a run that reports
//!    success always leaves `done` behind.
//! 4. [`HeartbeatHandle::abandon`] stops the worker without a terminal write;
//!    readers will see the dump go stale. Dropping the handle without any of
//!    the three counts as `fail`.
//!
//! A failed or timed-out write stops the worker and cancels the run token it
//! was given, so the dump aborts instead of running without liveness.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use shroud_core::config::HeartbeatConfig;
use shroud_core::heartbeat::{HeartbeatStatus, HeartbeatWriter};
use shroud_core::id::DumpId;

use crate::error::{Error, Result};
use crate::metrics;

/// Periodic heartbeat writer for one dump.
#[derive(Debug)]
pub struct HeartbeatWorker {
    beat: Beat,
    interval: Duration,
}

/// The single write path shared by the worker loop and the terminal write.
#[derive(Debug, Clone)]
struct Beat {
    dump_id: DumpId,
    writer: HeartbeatWriter,
    write_timeout: Duration,
}

impl HeartbeatWorker {
    /// Creates a worker for `dump_id` with the given timing.
    #[must_use]
    pub fn new(dump_id: DumpId, writer: HeartbeatWriter, config: &HeartbeatConfig) -> Self {
        Self {
            beat: Beat {
                dump_id,
                writer,
                write_timeout: config.write_timeout,
            },
            interval: config.interval,
        }
    }

    /// Starts the worker on the current runtime.
    ///
    /// `shutdown` stops the refresh loop. `run` is cancelled if a heartbeat
    /// write fails.
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken, run: CancellationToken) -> HeartbeatHandle {
        let (stop, signal) = oneshot::channel();
        let beat = self.beat.clone();
        let join = tokio::spawn(async move {
            let result = self.run(signal, shutdown).await;
            if let Err(err) = &result {
                tracing::error!(error = %err, "heartbeat worker stopped; aborting run");
                run.cancel();
            }
            result
        });
        HeartbeatHandle {
            beat,
            stop: Some(stop),
            join: Some(join),
        }
    }

    async fn run(self, mut signal: oneshot::Receiver<()>, shutdown: CancellationToken) -> Result<()> {
        self.beat.write(HeartbeatStatus::InProgress).await?;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                stopped = &mut signal => {
                    if stopped.is_err() {
                        // Handle dropped without finalizing.
                        self.beat.write(HeartbeatStatus::Failed).await?;
                    }
                    return Ok(());
                }
                () = shutdown.cancelled() => {
                    tracing::debug!(dump_id = %self.beat.dump_id, "heartbeat worker shut down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.beat.write(HeartbeatStatus::InProgress).await?;
                }
            }
        }
    }
}

impl Beat {
    async fn write(&self, status: HeartbeatStatus) -> Result<()> {
        let outcome = tokio::time::timeout(self.write_timeout, self.writer.write(status)).await;
        metrics::record_heartbeat_write(status.as_str(), matches!(outcome, Ok(Ok(()))));
        match outcome {
            Ok(Ok(())) => {
                tracing::trace!(dump_id = %self.dump_id, %status, "heartbeat written");
                Ok(())
            }
            Ok(Err(source)) => Err(Error::Heartbeat {
                dump_id: self.dump_id.clone(),
                source,
            }),
            Err(_) => Err(Error::HeartbeatTimeout {
                dump_id: self.dump_id.clone(),
                timeout: self.write_timeout,
            }),
        }
    }
}

/// Handle used to finalize a running [`HeartbeatWorker`].
#[derive(Debug)]
pub struct HeartbeatHandle {
    beat: Beat,
    stop: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<Result<()>>>,
}

impl HeartbeatHandle {
    /// Stops the worker and persists `done`.
    ///
    /// # Errors
    ///
    /// Returns the worker's error if any heartbeat write failed.
    pub async fn complete(self) -> Result<()> {
        self.finish(Some(HeartbeatStatus::Done)).await
    }

    /// Stops the worker and persists `failed`.
    ///
    /// # Errors
    ///
    /// Returns the worker's error if any heartbeat write failed.
    pub async fn fail(self) -> Result<()> {
        self.finish(Some(HeartbeatStatus::Failed)).await
    }

    /// Stops the worker and leaves the last `in-progress` write in place.
    ///
    /// # Errors
    ///
    /// Returns the worker's error if any heartbeat write failed.
    pub async fn abandon(self) -> Result<()> {
        self.finish(None).await
    }

    async fn finish(mut self, status: Option<HeartbeatStatus>) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            // The receiver is gone only if the worker already exited; its
            // join result below carries the reason.
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            join.await.map_err(|e| Error::Internal {
                message: format!("heartbeat worker panicked: {e}"),
            })??;
        }
        let Some(status) = status else {
            tracing::debug!(dump_id = %self.beat.dump_id, "heartbeat left in progress");
            return Ok(());
        };
        self.beat.write(status).await?;
        tracing::debug!(dump_id = %self.beat.dump_id, %status, "heartbeat finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shroud_core::scoped_storage::ScopedStorage;
    use shroud_core::storage::{MemoryBackend, StorageBackend};
    use std::sync::Arc;

    fn config(interval: Duration) -> HeartbeatConfig {
        HeartbeatConfig {
            interval,
            stale_after: interval * 2,
            write_timeout: Duration::from_secs(5),
        }
    }

    fn worker(backend: &Arc<MemoryBackend>, interval: Duration) -> HeartbeatWorker {
        let scope = ScopedStorage::with_prefix(backend.clone(), "d1").expect("scope");
        let dump_id: DumpId = "d1".parse().expect("id");
        HeartbeatWorker::new(dump_id, HeartbeatWriter::new(scope), &config(interval))
    }

    async fn stored(backend: &MemoryBackend) -> Bytes {
        backend.get("d1/heartbeat").await.expect("heartbeat")
    }

    #[tokio::test]
    async fn complete_writes_done() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = worker(&backend, Duration::from_secs(900))
            .spawn(CancellationToken::new(), CancellationToken::new());

        tokio::task::yield_now().await;
        handle.complete().await.expect("complete");
        assert_eq!(stored(&backend).await, Bytes::from("done"));
    }

    #[tokio::test]
    async fn fail_writes_failed() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = worker(&backend, Duration::from_secs(900))
            .spawn(CancellationToken::new(), CancellationToken::new());

        handle.fail().await.expect("fail");
        assert_eq!(stored(&backend).await, Bytes::from("failed"));
    }

    #[tokio::test]
    async fn abandon_skips_terminal_write() {
        let backend = Arc::new(MemoryBackend::new());
        let shutdown = CancellationToken::new();
        let handle =
            worker(&backend, Duration::from_secs(900)).spawn(shutdown.clone(), CancellationToken::new());

        // Let the initial write land before shutting down.
        for _ in 0..10 {
            if backend.head("d1/heartbeat").await.expect("head").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.abandon().await.expect("exit");
        assert_eq!(stored(&backend).await, Bytes::from("in-progress"));
    }

    #[tokio::test]
    async fn complete_after_shutdown_still_writes_done() {
        let backend = Arc::new(MemoryBackend::new());
        let shutdown = CancellationToken::new();
        let handle =
            worker(&backend, Duration::from_secs(900)).spawn(shutdown.clone(), CancellationToken::new());

        shutdown.cancel();
        // Give the worker time to observe the shutdown before finalizing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.complete().await.expect("complete");
        assert_eq!(stored(&backend).await, Bytes::from("done"));
    }

    #[tokio::test]
    async fn dropped_handle_marks_failed() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = worker(&backend, Duration::from_secs(900))
            .spawn(CancellationToken::new(), CancellationToken::new());
        let join_backend = Arc::clone(&backend);
        drop(handle);

        for _ in 0..50 {
            if join_backend.get("d1/heartbeat").await.ok() == Some(Bytes::from("failed")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("heartbeat was not marked failed");
    }

    #[tokio::test]
    async fn ticker_refreshes_update_time() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = worker(&backend, Duration::from_millis(20))
            .spawn(CancellationToken::new(), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        backend.set_last_modified("d1/heartbeat", past).expect("age");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let meta = backend.head("d1/heartbeat").await.expect("head").expect("exists");
        assert!(meta.last_modified > past);
        assert_eq!(stored(&backend).await, Bytes::from("in-progress"));

        handle.complete().await.expect("complete");
    }
}
