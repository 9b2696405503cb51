// Request coordinator - single-flight de-duplication and short-TTL result cache
use crate::domain::error::TrackerError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(20);

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, TrackerError>>>;

struct CacheEntry<T> {
    data: T,
    timestamp: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) < self.ttl
    }
}

/// Coordinates upstream calls by key.
///
/// At most one call per key is in flight; concurrent callers attach to it
/// and all observe the same result. Successful results can additionally be
/// served from a short-lived cache.
pub struct RequestCoordinator<T> {
    in_flight: Arc<Mutex<HashMap<String, SharedResult<T>>>>,
    cache: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `factory` unless a call for `key` is already in flight, in which
    /// case wait for that one instead. The key is released once the call
    /// settles, whether it succeeded or not.
    pub async fn dedupe<F, Fut>(&self, key: &str, factory: F) -> Result<T, TrackerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TrackerError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = lock(&*self.in_flight);
            match in_flight.get(key).cloned() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight request for {}", key);
                    pending
                }
                None => {
                    let registry = self.in_flight.clone();
                    let owned_key = key.to_string();
                    let call = factory();
                    let pending = async move {
                        let result = call.await;
                        lock(&*registry).remove(&owned_key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        shared.await
    }

    /// Serve from cache while the entry is younger than `ttl`, otherwise go
    /// through [`dedupe`](Self::dedupe). Only successes are cached.
    pub async fn with_ttl_cache<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> Result<T, TrackerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TrackerError>> + Send + 'static,
    {
        if let Some(data) = self.cached(key) {
            tracing::debug!("Cache hit for {}", key);
            return Ok(data);
        }

        let data = self.dedupe(key, factory).await?;

        lock(&self.cache).insert(
            key.to_string(),
            CacheEntry {
                data: data.clone(),
                timestamp: Instant::now(),
                ttl,
            },
        );
        Ok(data)
    }

    fn cached(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut cache = lock(&self.cache);
        match cache.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.data.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    #[cfg(test)]
    pub fn in_flight_count(&self) -> usize {
        lock(&*self.in_flight).len()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, TrackerError>> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dedupe_runs_factory_once() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coordinator.dedupe("k", counting_factory(&calls, 1)),
            coordinator.dedupe("k", counting_factory(&calls, 2)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_releases_key_after_failure() {
        let coordinator = RequestCoordinator::<u32>::new();

        let first = coordinator
            .dedupe("k", || async { Err(TrackerError::Upstream("503".to_string())) })
            .await;
        assert!(first.is_err());
        assert_eq!(coordinator.in_flight_count(), 0);

        let second = coordinator.dedupe("k", || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_independently() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coordinator.dedupe("a", counting_factory(&calls, 1)),
            coordinator.dedupe("b", counting_factory(&calls, 2)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cache_serves_until_expiry() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(20);

        let first = coordinator.with_ttl_cache("k", ttl, counting_factory(&calls, 1)).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = coordinator.with_ttl_cache("k", ttl, counting_factory(&calls, 2)).await;
        assert_eq!((first, second), (Ok(1), Ok(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(15)).await;
        let third = coordinator.with_ttl_cache("k", ttl, counting_factory(&calls, 3)).await;
        assert_eq!(third, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cache_does_not_store_failures() {
        let coordinator = RequestCoordinator::<u32>::new();
        let ttl = Duration::from_secs(20);

        let failed = coordinator
            .with_ttl_cache("k", ttl, || async { Err(TrackerError::Timeout(60)) })
            .await;
        assert_eq!(failed, Err(TrackerError::Timeout(60)));

        let retried = coordinator.with_ttl_cache("k", ttl, || async { Ok(9) }).await;
        assert_eq!(retried, Ok(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_forces_refetch() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(20);

        let _ = coordinator.with_ttl_cache("k", ttl, counting_factory(&calls, 1)).await;
        coordinator.clear_cache();
        let again = coordinator.with_ttl_cache("k", ttl, counting_factory(&calls, 2)).await;

        assert_eq!(again, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
