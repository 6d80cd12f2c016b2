//! Worker pool that runs a partition plan on scoped OS threads.
//!
//! Group 0 runs on the calling thread; every other group gets its own thread.
//! There is no cancellation: once spawned, a worker runs its whole group even
//! if a sibling has already failed. Failures surface as one error after all
//! workers have been joined.

pub mod partition;

pub use partition::{
    balanced, chunked, desired_parallelism, group_count, partition, single, PartitionPlan, Policy,
    Weighed, WorkGroup,
};

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

/// Runs every group of `plan` through `task` and concatenates the per-group
/// results in group order.
///
/// `task` receives the group index and the group's items.
pub fn run_groups<T, R, F>(plan: &[WorkGroup<T>], task: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &[T]) -> Result<Vec<R>> + Sync,
{
    if plan.is_empty() {
        return Ok(Vec::new());
    }

    let start = Instant::now();
    let task = &task;

    let outcomes: Vec<Result<Vec<R>>> = thread::scope(|s| {
        let handles: Vec<_> = plan
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, group)| {
                thread::Builder::new()
                    .name(format!("splitcache-worker-{i}"))
                    .spawn_scoped(s, move || run_one(i, group, task))
            })
            .collect();

        // Use the caller's thread instead of leaving it idle.
        let mut outcomes = Vec::with_capacity(plan.len());
        outcomes.push(run_inline(0, &plan[0], task));

        for (offset, handle) in handles.into_iter().enumerate() {
            let group = offset + 1;
            let outcome = match handle {
                Ok(h) => h.join().unwrap_or(Err(CacheError::WorkerPanicked { group })),
                // Could not spawn: run it here rather than lose the group.
                Err(e) => {
                    warn!(group, error = %e, "failed to spawn worker, running inline");
                    run_inline(group, &plan[group], task)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    });

    let mut results = Vec::new();
    let mut first_failure = None;
    for (group, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(mut r) => results.append(&mut r),
            Err(e) => {
                warn!(group, error = %e, "group failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    match first_failure {
        Some(e) => {
            info!(
                groups = plan.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "worker pool failed"
            );
            Err(e)
        }
        None => {
            debug!(
                groups = plan.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "worker pool finished"
            );
            Ok(results)
        }
    }
}

/// Runs a group on the calling thread. A panic is reported the same way as a
/// panicking spawned worker.
fn run_inline<T, R, F>(group: usize, work: &WorkGroup<T>, task: &F) -> Result<Vec<R>>
where
    F: Fn(usize, &[T]) -> Result<Vec<R>>,
{
    panic::catch_unwind(AssertUnwindSafe(|| run_one(group, work, task)))
        .unwrap_or(Err(CacheError::WorkerPanicked { group }))
}

fn run_one<T, R, F>(group: usize, work: &WorkGroup<T>, task: &F) -> Result<Vec<R>>
where
    F: Fn(usize, &[T]) -> Result<Vec<R>>,
{
    let start = Instant::now();
    let outcome = task(group, &work.items);
    debug!(
        group,
        items = work.items.len(),
        size = work.aggregate_size,
        ok = outcome.is_ok(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "group done"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn group_zero_runs_on_the_caller() {
        let caller = thread::current().id();
        let seen = Mutex::new(Vec::new());
        let plan = balanced(vec![5u64, 4, 3, 2], 4);

        let out = run_groups(&plan, |group, items| {
            seen.lock().unwrap().push((group, thread::current().id()));
            Ok(items.to_vec())
        })
        .unwrap();

        assert_eq!(out, vec![5, 4, 3, 2]);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        for (group, id) in seen {
            assert_eq!(group == 0, id == caller, "group {group}");
        }
    }

    #[test]
    fn one_failure_fails_the_run_but_siblings_finish() {
        let finished = AtomicUsize::new(0);
        let plan = balanced(vec![1u64, 1, 1], 3);

        let out: Result<Vec<u64>> = run_groups(&plan, |group, _| {
            finished.fetch_add(1, Ordering::SeqCst);
            if group == 1 {
                Err(CacheError::ArtifactMissing { index: 9, path: PathBuf::from("x") })
            } else {
                Ok(vec![1])
            }
        });

        assert!(matches!(out, Err(CacheError::ArtifactMissing { index: 9, .. })));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_worker_is_reported() {
        let plan = balanced(vec![1u64, 1], 2);
        let out: Result<Vec<u64>> = run_groups(&plan, |group, _| {
            if group == 1 {
                panic!("boom");
            }
            Ok(vec![])
        });
        assert!(matches!(out, Err(CacheError::WorkerPanicked { group: 1 })));
    }

    #[test]
    fn panic_on_the_calling_thread_is_reported() {
        let finished = AtomicUsize::new(0);
        let plan = balanced(vec![1u64, 1, 1], 3);
        let out: Result<Vec<u64>> = run_groups(&plan, |group, _| {
            if group == 0 {
                panic!("boom");
            }
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });
        assert!(matches!(out, Err(CacheError::WorkerPanicked { group: 0 })));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn single_group_panic_is_reported() {
        let plan = single(vec![7u64]);
        let out: Result<Vec<u64>> = run_groups(&plan, |_, _| panic!("boom"));
        assert!(matches!(out, Err(CacheError::WorkerPanicked { group: 0 })));
    }

    #[test]
    fn empty_plan_is_empty_result() {
        let plan: PartitionPlan<u64> = Vec::new();
        let out = run_groups(&plan, |_, items| Ok(items.to_vec())).unwrap();
        assert!(out.is_empty());
    }
}
