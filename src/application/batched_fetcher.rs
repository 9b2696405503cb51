// Batched fetcher - sequential batches with per-batch failure isolation
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default identifiers per upstream call, sized for the upstream URL limit
pub const DEFAULT_BATCH_SIZE: usize = 900;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: Vec<T>,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl<T> BatchOutcome<T> {
    fn new(total_batches: usize) -> Self {
        Self {
            results: Vec::new(),
            total_batches,
            completed_batches: 0,
            failed_batches: 0,
            timed_out: false,
            cancelled: false,
        }
    }

    /// True when there was work to do and no batch produced anything
    pub fn all_failed(&self) -> bool {
        self.total_batches > 0 && self.completed_batches == 0
    }
}

#[derive(Debug, Clone)]
pub struct BatchedFetcher {
    batch_size: usize,
    timeout: Duration,
}

impl Default for BatchedFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT)
    }
}

impl BatchedFetcher {
    pub fn new(batch_size: usize, timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `batch_fn` over consecutive chunks of `items`, one chunk at a time.
    ///
    /// A failing chunk is logged and contributes nothing; the loop moves on.
    /// Once the overall timeout passes or `cancel` fires, the running chunk is
    /// dropped and whatever has accumulated so far is returned.
    pub async fn fetch_in_batches<T, F, Fut>(
        &self,
        items: &[String],
        cancel: &CancellationToken,
        mut batch_fn: F,
    ) -> BatchOutcome<T>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let total = items.len().div_ceil(self.batch_size);
        let mut outcome = BatchOutcome::new(total);
        let deadline = Instant::now() + self.timeout;

        for (index, chunk) in items.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Batch fetch cancelled at batch {}/{}", index + 1, total);
                    outcome.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        "Batch fetch timed out after {:?} at batch {}/{}, returning {} partial results",
                        self.timeout, index + 1, total, outcome.results.len()
                    );
                    outcome.timed_out = true;
                    break;
                }
                result = batch_fn(chunk.to_vec()) => match result {
                    Ok(mut batch) => {
                        tracing::debug!(
                            "Batch {}/{} returned {} results for {} items",
                            index + 1, total, batch.len(), chunk.len()
                        );
                        outcome.completed_batches += 1;
                        outcome.results.append(&mut batch);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Batch {}/{} ({} items) failed: {:#}",
                            index + 1, total, chunk.len(), e
                        );
                        outcome.failed_batches += 1;
                    }
                },
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id{}", i)).collect()
    }

    #[tokio::test]
    async fn test_partitions_into_sequential_batches() {
        let fetcher = BatchedFetcher::new(3, Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let outcome = fetcher
            .fetch_in_batches(&ids(7), &token, |batch| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(batch.len());
                    Ok(batch)
                }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![3, 3, 1]);
        assert_eq!(outcome.total_batches, 3);
        assert_eq!(outcome.results, ids(7));
        assert!(!outcome.all_failed());
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let fetcher = BatchedFetcher::new(2, Duration::from_secs(5));
        let token = CancellationToken::new();

        let outcome = fetcher
            .fetch_in_batches(&ids(6), &token, |batch| async move {
                if batch[0] == "id2" {
                    anyhow::bail!("upstream returned 502");
                }
                Ok(batch)
            })
            .await;

        assert_eq!(outcome.results, vec!["id0", "id1", "id4", "id5"]);
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.completed_batches, 2);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_all_batches_failing() {
        let fetcher = BatchedFetcher::new(2, Duration::from_secs(5));
        let token = CancellationToken::new();

        let outcome: BatchOutcome<String> = fetcher
            .fetch_in_batches(&ids(4), &token, |_| async { anyhow::bail!("down") })
            .await;

        assert!(outcome.all_failed());
        assert_eq!(outcome.failed_batches, 2);
    }

    #[tokio::test]
    async fn test_empty_input_runs_nothing() {
        let fetcher = BatchedFetcher::default();
        let token = CancellationToken::new();

        let outcome: BatchOutcome<String> = fetcher
            .fetch_in_batches(&[], &token, |_| async { panic!("no batches expected") })
            .await;

        assert_eq!(outcome.total_batches, 0);
        assert!(!outcome.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_results() {
        let fetcher = BatchedFetcher::new(1, Duration::from_secs(60));
        let token = CancellationToken::new();

        let outcome = fetcher
            .fetch_in_batches(&ids(3), &token, |batch| async move {
                tokio::time::sleep(Duration::from_secs(40)).await;
                Ok(batch)
            })
            .await;

        assert!(outcome.timed_out);
        assert_eq!(outcome.results, vec!["id0"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = BatchedFetcher::new(1, Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();

        let outcome: BatchOutcome<String> = fetcher
            .fetch_in_batches(&ids(3), &token, |batch| async move { Ok(batch) })
            .await;

        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
    }
}
