//! Bounded-concurrency task runner.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Runs `tasks` with at most `concurrency` in flight and returns their
/// results in input order.
///
/// A task is only started once a slot frees up. The first error to complete
/// is returned and the remaining in-flight tasks are dropped.
pub async fn run_bounded<T, E, F, Fut>(tasks: Vec<F>, concurrency: usize) -> Result<Vec<T>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = tasks.len();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();

    let mut in_flight = stream::iter(tasks.into_iter().enumerate())
        .map(|(index, task)| async move { task().await.map(|value| (index, value)) })
        .buffer_unordered(concurrency.max(1));

    while let Some(outcome) = in_flight.next().await {
        let (index, value) = outcome?;
        results[index] = Some(value);
    }

    Ok(results.into_iter().flatten().collect())
}
