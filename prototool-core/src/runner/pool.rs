//! Bounded concurrency for independent per-file work.
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Worker count matching the host's available parallelism.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Runs `task` over every item with at most `limit` in flight.
///
/// Results come back in the order of `items`, not completion order.
pub async fn run_bounded<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    task: F,
) -> Result<Vec<Fut::Output>, JoinError>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut join_set = JoinSet::new();
    let total = items.len();

    for (index, item) in items.into_iter().enumerate() {
        // Only fails once the semaphore is closed, which never happens here
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let work = task(item);

        join_set.spawn(async move {
            let output = work.await;
            drop(permit);
            (index, output)
        });
    }

    let mut slots: Vec<Option<Fut::Output>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, output) = joined?;
        slots[index] = Some(output);
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn keeps_input_order_and_respects_the_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..12u64).collect(), 3, |n| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(12 - n)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                n * 2
            }
        })
        .await
        .unwrap();

        assert_eq!(results, (0..12u64).map(|n| n * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
