//! Bounded concurrent execution for "run all"

use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run `task` over `items` with at most `limit` in flight.
///
/// Every item runs to completion regardless of how its siblings fare. Results
/// are returned in completion order, tagged with the item's input position.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, task: F) -> Vec<(usize, R)>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let task = &task;
    let mut tasks = FuturesUnordered::new();

    for (position, item) in items.into_iter().enumerate() {
        let sem = sem.clone();
        tasks.push(async move {
            // The semaphore is never closed
            let _permit = sem.acquire_owned().await.ok();
            (position, task(item).await)
        });
    }

    let mut results = Vec::new();
    while let Some(result) = tasks.next().await {
        results.push(result);
    }
    results
}
