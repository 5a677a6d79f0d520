//! Request Coalescer - Shared In-flight Futures with a Bounded TTL Cache
//!
//! The one place where concurrent identical reads are merged. A lookup
//! goes cache → in-flight → fetch:
//! - a live cache entry is returned as is
//! - an in-flight fetch for the same key is joined (no new network call)
//! - otherwise a new fetch is started and shared with later callers
//!
//! The fetch future settles its own bookkeeping (drops the in-flight
//! entry, stores the result on success when a TTL is given), so a caller
//! that is cancelled mid-await never leaves a stale in-flight entry behind.
//!
//! The cache is bounded: inserting past capacity evicts the oldest keys in
//! insertion order, regardless of TTL.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Where a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupSource {
    /// Live cache entry.
    Cache,
    /// Joined an in-flight fetch.
    Coalesced,
    /// Started a new fetch.
    Network,
}

impl LookupSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Coalesced => "coalesced",
            Self::Network => "network",
        }
    }
}

type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct Inflight<V, E> {
    generation: u64,
    future: SharedFetch<V, E>,
}

struct State<K, V, E> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order of `entries`, oldest first.
    order: VecDeque<K>,
    inflight: HashMap<K, Inflight<V, E>>,
    next_generation: u64,
}

impl<K, V, E> State<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn live(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove_entry(key);
        }
        None
    }

    fn remove_entry(&mut self, key: &K) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn insert(&mut self, key: K, value: V, expires_at: Instant, capacity: usize) {
        self.remove_entry(&key);
        self.order.push_back(key.clone());
        self.entries.insert(key, CacheEntry { value, expires_at });

        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn settle(&mut self, key: &K, generation: u64, cached: Option<(V, Instant)>, capacity: usize) {
        let ours = self
            .inflight
            .get(key)
            .is_some_and(|inflight| inflight.generation == generation);
        if ours {
            self.inflight.remove(key);
        }
        if let Some((value, expires_at)) = cached {
            self.insert(key.clone(), value, expires_at, capacity);
        }
    }
}

/// Coalescing, TTL-bounded cache keyed by `K`.
pub struct Coalescer<K, V, E> {
    state: Arc<Mutex<State<K, V, E>>>,
    capacity: usize,
}

impl<K, V, E> Coalescer<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a coalescer holding at most `capacity` cached entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                order: VecDeque::new(),
                inflight: HashMap::new(),
                next_generation: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key`, joining or starting `fetch` as needed.
    ///
    /// With `ttl = Some(_)` a successful result is cached for that long;
    /// with `None` only concurrent callers share the result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: K,
        ttl: Option<Duration>,
        fetch: F,
    ) -> (Result<V, E>, LookupSource)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (future, source) = {
            let mut state = self.state.lock().await;

            if ttl.is_some() {
                if let Some(value) = state.live(&key, Instant::now()) {
                    return (Ok(value), LookupSource::Cache);
                }
            }

            if let Some(inflight) = state.inflight.get(&key) {
                (inflight.future.clone(), LookupSource::Coalesced)
            } else {
                let generation = state.next_generation;
                state.next_generation += 1;

                let shared_state = Arc::clone(&self.state);
                let capacity = self.capacity;
                let settle_key = key.clone();
                let request = fetch();

                let future = async move {
                    let result = request.await;
                    let cached = match (&result, ttl) {
                        (Ok(value), Some(ttl)) => Some((value.clone(), Instant::now() + ttl)),
                        _ => None,
                    };
                    shared_state
                        .lock()
                        .await
                        .settle(&settle_key, generation, cached, capacity);
                    result
                }
                .boxed()
                .shared();

                state.inflight.insert(
                    key,
                    Inflight {
                        generation,
                        future: future.clone(),
                    },
                );
                (future, LookupSource::Network)
            }
        };

        (future.await, source)
    }

    /// Drop every cached entry. In-flight fetches finish normally.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }

    /// Number of live-or-expired cached entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of fetches currently in transit.
    pub async fn inflight(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u64, String>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_hit_then_expiry() {
        let coalescer: Coalescer<&'static str, u64, String> = Coalescer::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_secs(2));

        let (v, src) = coalescer.get_or_fetch("k", ttl, counting_fetch(&calls, 1)).await;
        assert_eq!((v, src), (Ok(1), LookupSource::Network));

        let (v, src) = coalescer.get_or_fetch("k", ttl, counting_fetch(&calls, 2)).await;
        assert_eq!((v, src), (Ok(1), LookupSource::Cache));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2_001)).await;
        let (v, src) = coalescer.get_or_fetch("k", ttl, counting_fetch(&calls, 3)).await;
        assert_eq!((v, src), (Ok(3), LookupSource::Network));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let coalescer: Coalescer<u8, u64, String> = Coalescer::new(10);
        let ttl = Some(Duration::from_secs(60));

        let (first, _) = coalescer
            .get_or_fetch(1, ttl, || async { Err::<u64, _>("boom".to_string()) })
            .await;
        assert!(first.is_err());

        let (second, src) = coalescer.get_or_fetch(1, ttl, || async { Ok(9) }).await;
        assert_eq!(second, Ok(9));
        assert_eq!(src, LookupSource::Network);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_first() {
        let coalescer: Coalescer<u32, u32, String> = Coalescer::new(3);
        let ttl = Some(Duration::from_secs(60));
        for k in 0..4u32 {
            let _ = coalescer.get_or_fetch(k, ttl, move || async move { Ok(k) }).await;
        }
        assert_eq!(coalescer.len().await, 3);

        let (_, oldest) = coalescer.get_or_fetch(0, ttl, || async { Ok(0) }).await;
        assert_eq!(oldest, LookupSource::Network);
        let (_, newest) = coalescer.get_or_fetch(3, ttl, || async { Ok(3) }).await;
        assert_eq!(newest, LookupSource::Cache);
    }

    #[tokio::test]
    async fn test_dedup_only_does_not_cache() {
        let coalescer: Coalescer<u8, u64, String> = Coalescer::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = coalescer.get_or_fetch(1, None, counting_fetch(&calls, 1)).await;
        let _ = coalescer.get_or_fetch(1, None, counting_fetch(&calls, 1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(coalescer.is_empty().await);
        assert_eq!(coalescer.inflight().await, 0);
    }
}
