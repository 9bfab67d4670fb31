//! Property tests for the worker pool's at-most-once and fail-fast behavior.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use shroud_flow::error::Error;
use shroud_flow::pool::WorkerPool;
use shroud_flow::task::TaskMeta;
use tokio_util::sync::CancellationToken;

fn run_pool(
    tasks: usize,
    jobs: usize,
    failing: Option<usize>,
) -> (Result<Vec<usize>, Error>, HashMap<usize, usize>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("runtime");
    let runs = Arc::new(Mutex::new(HashMap::new()));
    let counter = Arc::clone(&runs);

    let result = runtime.block_on(async move {
        WorkerPool::new(jobs)
            .run(
                (0..tasks).collect::<Vec<_>>().into_iter(),
                &CancellationToken::new(),
                move |_, task| {
                    let counter = Arc::clone(&counter);
                    async move {
                        *counter.lock().expect("lock").entry(task).or_insert(0) += 1;
                        tokio::time::sleep(Duration::from_millis((task % 3) as u64)).await;
                        if Some(task) == failing {
                            return Err(Error::TaskFailed {
                                task: format!("task-{task}"),
                                meta: TaskMeta::new(),
                                source: "boom".into(),
                            });
                        }
                        Ok(task)
                    }
                },
            )
            .await
    });
    let runs = runs.lock().expect("lock").clone();
    (result, runs)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_task_runs_exactly_once_on_success(tasks in 0usize..40, jobs in 0usize..8) {
        let (result, runs) = run_pool(tasks, jobs, None);
        let mut done = result.expect("pool succeeds");
        done.sort_unstable();
        prop_assert_eq!(done, (0..tasks).collect::<Vec<_>>());
        prop_assert!(runs.values().all(|&n| n == 1));
        prop_assert_eq!(runs.len(), tasks);
    }

    #[test]
    fn failure_is_reported_and_no_task_runs_twice(
        tasks in 1usize..40,
        jobs in 1usize..8,
        seed in any::<usize>(),
    ) {
        let failing = seed % tasks;
        let (result, runs) = run_pool(tasks, jobs, Some(failing));
        match result {
            Err(Error::TaskFailed { task, .. }) => prop_assert_eq!(task, format!("task-{failing}")),
            other => prop_assert!(false, "expected task failure, got {:?}", other),
        }
        prop_assert!(runs.values().all(|&n| n == 1));
        prop_assert_eq!(runs.get(&failing).copied(), Some(1));
    }
}
