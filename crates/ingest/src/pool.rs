//! Bounded blocking worker pool for per-unit work.

use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::trace;

use crate::IngestError;

/// Run `work(0..count)` on the blocking pool with at most `parallelism`
/// tasks in flight. Results come back in ordinal order. The first failure
/// aborts every task that has not started yet and is returned.
pub(crate) async fn run_bounded<T, F>(
    parallelism: usize,
    count: u64,
    work: F,
) -> Result<Vec<T>, IngestError>
where
    T: Send + 'static,
    F: Fn(u64) -> Result<T, IngestError> + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut set = JoinSet::new();
    let mut out: Vec<Option<T>> = (0..count).map(|_| None).collect();

    for ordinal in 0..count {
        while let Some(joined) = set.try_join_next() {
            collect(&mut set, &mut out, joined)?;
        }

        let permit = permits.clone().acquire_owned().await.map_err(|_| IngestError::Cancelled)?;
        let work = work.clone();
        set.spawn_blocking(move || {
            let _permit = permit;
            trace!(ordinal, "Worker started");
            (ordinal, work(ordinal))
        });
    }

    while let Some(joined) = set.join_next().await {
        collect(&mut set, &mut out, joined)?;
    }

    out.into_iter()
        .map(|slot| slot.ok_or(IngestError::Cancelled))
        .collect()
}

type Joined<T> = Result<(u64, Result<T, IngestError>), tokio::task::JoinError>;

fn collect<T: 'static>(
    set: &mut JoinSet<(u64, Result<T, IngestError>)>,
    out: &mut [Option<T>],
    joined: Joined<T>,
) -> Result<(), IngestError> {
    let failure = match joined {
        Ok((ordinal, Ok(value))) => {
            out[ordinal as usize] = Some(value);
            return Ok(());
        }
        Ok((_, Err(e))) => e,
        Err(e) => IngestError::from(e),
    };
    set.abort_all();
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_in_order() {
        let out = run_bounded(3, 10, |n| Ok(n * n)).await.unwrap();
        assert_eq!(out, (0..10).map(|n| n * n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());

        run_bounded(2, 12, move |_| {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let result = run_bounded(1, 8, |n| {
            if n == 3 {
                Err(IngestError::InvalidRequest("unit 3".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_matches!(result, Err(IngestError::InvalidRequest(msg)) if msg == "unit 3");
    }

    #[tokio::test]
    async fn test_empty() {
        let out: Vec<u64> = run_bounded(4, 0, Ok).await.unwrap();
        assert!(out.is_empty());
    }
}
