//! Bounded worker pool shared by dump and restore.
//!
//! One producer feeds a bounded channel of capacity `jobs`; `jobs` workers
//! drain it. The first failure cancels everything else in the group and is
//! the error the pool returns. Each task is received by exactly one worker,
//! so no task runs twice. There is no retry.
//!
//! Every blocking point (task source, channel send, channel receive, task
//! body) observes the group's cancellation token. [`WorkerPool::run`] drops a
//! running task body when the token fires; [`WorkerPool::run_cooperative`]
//! hands the token to the body and waits for it to return, so bodies can
//! release what they hold first.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Something that yields tasks one at a time.
#[async_trait]
pub trait TaskSource<T>: Send {
    /// Returns the next task, or `None` once exhausted.
    ///
    /// Implementations that block must return [`Error::Cancelled`] when
    /// `cancel` fires.
    async fn next_task(&mut self, cancel: &CancellationToken) -> Result<Option<T>>;
}

#[async_trait]
impl<T: Send> TaskSource<T> for std::vec::IntoIter<T> {
    async fn next_task(&mut self, _cancel: &CancellationToken) -> Result<Option<T>> {
        Ok(self.next())
    }
}

/// Runs tasks with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    jobs: usize,
}

impl WorkerPool {
    /// Creates a pool with `jobs` workers. Zero is treated as one.
    #[must_use]
    pub fn new(jobs: usize) -> Self {
        if jobs == 0 {
            tracing::warn!("job count must be positive; using 1");
        }
        Self { jobs: jobs.max(1) }
    }

    /// Number of workers.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Feeds every task from `source` to `work` and collects the outputs.
    ///
    /// `work` receives the worker index and the task. Output order is
    /// unspecified.
    ///
    /// # Errors
    ///
    /// Returns the first non-cancellation error raised by the source or any
    /// task. If the caller cancelled `parent` and nothing failed, returns
    /// [`Error::Cancelled`].
    pub async fn run<T, R, S, F, Fut>(
        &self,
        source: S,
        parent: &CancellationToken,
        work: F,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        S: TaskSource<T> + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.run_group(source, parent, move |worker_id, task, _| work(worker_id, task), true)
            .await
    }

    /// Like [`WorkerPool::run`], but a running body is never dropped.
    ///
    /// `work` also receives the group's cancellation token and must return
    /// promptly once it fires; the pool waits for it.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::run`].
    pub async fn run_cooperative<T, R, S, F, Fut>(
        &self,
        source: S,
        parent: &CancellationToken,
        work: F,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        S: TaskSource<T> + 'static,
        F: Fn(usize, T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.run_group(source, parent, work, false).await
    }

    async fn run_group<T, R, S, F, Fut>(
        &self,
        source: S,
        parent: &CancellationToken,
        work: F,
        drop_on_cancel: bool,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        S: TaskSource<T> + 'static,
        F: Fn(usize, T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let started = Instant::now();
        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel::<T>(self.jobs);
        let rx = Arc::new(Mutex::new(rx));
        let work = Arc::new(work);
        let mut group: JoinSet<Result<Vec<R>>> = JoinSet::new();

        tracing::debug!(jobs = self.jobs, "planned workers");

        group.spawn(produce(source, tx, cancel.clone()));
        for worker_id in 0..self.jobs {
            group.spawn(consume(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&work),
                cancel.clone(),
                drop_on_cancel,
            ));
        }

        let mut outputs = Vec::new();
        let mut failure: Option<Error> = None;
        while let Some(joined) = group.join_next().await {
            let err = match joined {
                Ok(Ok(mut produced)) => {
                    outputs.append(&mut produced);
                    continue;
                }
                Ok(Err(err)) => err,
                Err(join_err) => Error::Internal {
                    message: format!("worker panicked: {join_err}"),
                },
            };
            cancel.cancel();
            // Sibling cancellations must not mask the failure that caused them.
            match &failure {
                None => failure = Some(err),
                Some(existing) if existing.is_cancelled() && !err.is_cancelled() => {
                    failure = Some(err);
                }
                Some(_) => {}
            }
        }

        if let Some(err) = failure {
            tracing::debug!(error = %err, elapsed = ?started.elapsed(), "worker pool failed");
            return Err(err);
        }
        if parent.is_cancelled() {
            return Err(Error::cancelled("running tasks"));
        }
        tracing::debug!(
            tasks = outputs.len(),
            elapsed = ?started.elapsed(),
            "worker pool finished"
        );
        Ok(outputs)
    }
}

async fn produce<T, R, S>(
    mut source: S,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
) -> Result<Vec<R>>
where
    T: Send,
    S: TaskSource<T>,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::cancelled("producing tasks")),
            next = source.next_task(&cancel) => next?,
        };
        let Some(task) = next else {
            // Dropping the sender closes the channel; workers drain and exit.
            return Ok(Vec::new());
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::cancelled("dispatching tasks")),
            sent = tx.send(task) => {
                if sent.is_err() {
                    return Err(Error::cancelled("dispatching tasks"));
                }
            }
        }
    }
}

async fn consume<T, R, F, Fut>(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    work: Arc<F>,
    cancel: CancellationToken,
    drop_on_cancel: bool,
) -> Result<Vec<R>>
where
    F: Fn(usize, T, CancellationToken) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut outputs = Vec::new();
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(worker_id, "exited due to cancellation");
                return Err(Error::cancelled("waiting for tasks"));
            }
            received = async { rx.lock().await.recv().await } => received,
        };
        let Some(task) = received else {
            tracing::debug!(worker_id, "exited normally");
            return Ok(outputs);
        };
        let body = work(worker_id, task, cancel.clone());
        let output = if drop_on_cancel {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::cancelled("running tasks")),
                output = body => output?,
            }
        } else {
            body.await?
        };
        outputs.push(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_list_succeeds_immediately() {
        let pool = WorkerPool::new(4);
        let out: Vec<()> = pool
            .run(Vec::<u32>::new().into_iter(), &CancellationToken::new(), |_, _| async {
                Ok(())
            })
            .await
            .expect("empty run");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn zero_jobs_runs_with_one_worker() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.jobs(), 1);
        let mut out = pool
            .run(vec![1, 2, 3].into_iter(), &CancellationToken::new(), |_, n| async move {
                Ok(n * 2)
            })
            .await
            .expect("run");
        out.sort_unstable();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn parallelism_is_bounded_by_jobs() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3);
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        pool.run(
            (0..20).collect::<Vec<_>>().into_iter(),
            &CancellationToken::new(),
            move |_, _| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .expect("run");
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn parent_cancellation_is_reported() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(2);
        let trigger = cancel.clone();
        let err = pool
            .run(vec![1, 2].into_iter(), &cancel, move |_, _| {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cooperative_run_waits_for_bodies_to_wind_down() {
        let cancel = CancellationToken::new();
        let released = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&released);
        let trigger = cancel.clone();
        let err = WorkerPool::new(2)
            .run_cooperative(vec![1, 2].into_iter(), &cancel, move |_, _, group| {
                let (trigger, released) = (trigger.clone(), Arc::clone(&seen));
                async move {
                    trigger.cancel();
                    tokio::select! {
                        () = group.cancelled() => {}
                        () = tokio::time::sleep(Duration::from_secs(60)) => {}
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    released.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::cancelled("running tasks"))
                }
            })
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(released.load(Ordering::SeqCst) >= 1);
    }
}
