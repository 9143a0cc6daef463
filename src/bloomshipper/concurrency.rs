//! Bounded Fan-out
//!
//! Runs one job per index with at most `limit` jobs in flight. The first
//! failing job aborts the batch: jobs not yet dispatched are never started
//! and in-flight ones are dropped. Results are index-aligned with the input
//! regardless of completion order.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Run `f(idx)` for every `idx` in `0..jobs`, fail-fast
pub async fn for_each_job<E, F, Fut>(jobs: usize, limit: usize, f: F) -> Result<(), E>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    stream::iter(0..jobs)
        .map(f)
        .buffer_unordered(limit.max(1))
        .try_for_each(|()| async { Ok(()) })
        .await
}

/// Run `f(idx)` for every `idx` in `0..jobs` and collect the outputs so that
/// slot `i` holds the result of job `i`
pub async fn map_jobs<T, E, F, Fut>(jobs: usize, limit: usize, f: F) -> Result<Vec<T>, E>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(jobs).collect();

    let mut results = stream::iter(0..jobs)
        .map(|idx| {
            let job = f(idx);
            async move { job.await.map(|value| (idx, value)) }
        })
        .buffer_unordered(limit.max(1));

    while let Some((idx, value)) = results.try_next().await? {
        slots[idx] = Some(value);
    }

    debug_assert!(
        slots.iter().all(Option::is_some),
        "Invariant violated: every job slot must be filled on success"
    );
    Ok(slots.into_iter().flatten().collect())
}
