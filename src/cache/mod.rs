// Query cache with request deduplication and stale-while-revalidate

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ApiError;

pub mod query;

pub use query::{scope, QueryKey};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, ApiError>>>;

// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    /// Entries not read for this long are dropped by `evict_expired`.
    pub gc_after: Duration,
    pub capacity: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            gc_after: Duration::from_secs(1800),
            capacity: 500,
        }
    }
}

/// Observable state of one query, as a view layer would render it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success { stale: bool, fetching: bool },
    Error(ApiError),
}

struct InFlight {
    id: u64,
    future: SharedFetch,
}

struct CacheEntry {
    value: Option<Arc<Value>>,
    updated_at: Option<Instant>,
    stale_after: Duration,
    invalidated: bool,
    last_access: Instant,
    error: Option<ApiError>,
    in_flight: Option<InFlight>,
}

impl CacheEntry {
    fn new(now: Instant, stale_after: Duration) -> Self {
        Self {
            value: None,
            updated_at: None,
            stale_after,
            invalidated: false,
            last_access: now,
            error: None,
            in_flight: None,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated
            && self
                .updated_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.stale_after)
    }
}

enum Lookup {
    Hit(Arc<Value>),
    Revalidate(Arc<Value>, SharedFetch),
    Wait(SharedFetch),
}

struct Inner {
    entries: DashMap<String, CacheEntry>,
    config: QueryCacheConfig,
    next_request_id: AtomicU64,
}

/// Process-wide query cache, passed explicitly to whatever needs it.
///
/// Cloning is cheap and every clone shares the same entries. Map guards are
/// never held across an `.await`, so each read-modify-write of an entry is
/// atomic.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryCacheConfig::default())
    }
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                config,
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.inner.config
    }

    /// Returns the cached value for `key`, fetching it when needed.
    ///
    /// * fresh value: returned, `fetcher` is not called;
    /// * stale value: returned at once while one background refetch runs;
    /// * nothing cached: joins the request already in flight for the key, or
    ///   starts one. All joined callers observe the same outcome.
    pub async fn fetch<F, Fut>(
        &self,
        key: &QueryKey,
        stale_after: Duration,
        fetcher: F,
    ) -> Result<Arc<Value>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let now = Instant::now();

        let lookup = {
            let mut entry = self
                .inner
                .entries
                .entry(key.as_str().to_string())
                .or_insert_with(|| CacheEntry::new(now, stale_after));
            entry.last_access = now;
            entry.stale_after = stale_after;

            let fresh = entry.is_fresh(now);
            let pending = entry.in_flight.as_ref().map(|f| f.future.clone());
            match (entry.value.clone(), pending) {
                (Some(value), _) if fresh => Lookup::Hit(value),
                (Some(value), Some(_)) => Lookup::Hit(value),
                (Some(value), None) => {
                    Lookup::Revalidate(value, self.start(key, &mut entry, fetcher()))
                }
                (None, Some(shared)) => Lookup::Wait(shared),
                (None, None) => Lookup::Wait(self.start(key, &mut entry, fetcher())),
            }
        };

        match lookup {
            Lookup::Hit(value) => {
                debug!(key = %key, "query cache hit");
                Ok(value)
            }
            Lookup::Revalidate(value, refresh) => {
                debug!(key = %key, "serving stale value while revalidating");
                tokio::spawn(async move {
                    let _ = refresh.await;
                });
                Ok(value)
            }
            Lookup::Wait(shared) => {
                debug!(key = %key, "query cache miss, awaiting request");
                shared.await
            }
        }
    }

    /// Starts a new request for `key` that supersedes any request in flight,
    /// and waits for it.
    pub async fn refetch<F, Fut>(
        &self,
        key: &QueryKey,
        stale_after: Duration,
        fetcher: F,
    ) -> Result<Arc<Value>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let now = Instant::now();
        let shared = {
            let mut entry = self
                .inner
                .entries
                .entry(key.as_str().to_string())
                .or_insert_with(|| CacheEntry::new(now, stale_after));
            entry.last_access = now;
            entry.stale_after = stale_after;
            self.start(key, &mut entry, fetcher())
        };
        shared.await
    }

    fn start<Fut>(&self, key: &QueryKey, entry: &mut CacheEntry, request: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::downgrade(&self.inner);
        let key = key.as_str().to_string();

        let future = async move {
            let result = request.await.map(Arc::new);
            if let Some(inner) = inner.upgrade() {
                QueryCache { inner }.commit(&key, id, &result);
            }
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }

    /// Stores a finished request, unless a newer request or an invalidation
    /// superseded it meanwhile.
    fn commit(&self, key: &str, id: u64, result: &Result<Arc<Value>, ApiError>) {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            debug!(key, "entry removed before request finished");
            return;
        };
        if entry.in_flight.as_ref().map(|f| f.id) != Some(id) {
            debug!(key, request_id = id, "discarding superseded response");
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.value = Some(value.clone());
                entry.updated_at = Some(Instant::now());
                entry.invalidated = false;
                entry.error = None;
            }
            Err(err) => {
                warn!(key, error = %err, "query failed");
                entry.error = Some(err.clone());
            }
        }
    }

    pub fn peek(&self, key: &QueryKey) -> Option<Arc<Value>> {
        self.inner
            .entries
            .get(key.as_str())
            .and_then(|entry| entry.value.clone())
    }

    pub fn status(&self, key: &QueryKey) -> QueryStatus {
        let Some(entry) = self.inner.entries.get(key.as_str()) else {
            return QueryStatus::Idle;
        };
        let fetching = entry.in_flight.is_some();
        match (&entry.value, &entry.error) {
            (Some(_), _) => QueryStatus::Success {
                stale: !entry.is_fresh(Instant::now()),
                fetching,
            },
            (None, _) if fetching => QueryStatus::Loading,
            (None, Some(err)) => QueryStatus::Error(err.clone()),
            (None, None) => QueryStatus::Idle,
        }
    }

    /// Marks the entry stale and detaches its in-flight request so that
    /// request can no longer write into the cache.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(mut entry) = self.inner.entries.get_mut(key.as_str()) {
            entry.invalidated = true;
            entry.in_flight = None;
        }
    }

    /// `invalidate` for every key under a scope. Returns how many matched.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let nested = format!("{}:", prefix);
        let mut count = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry.key() == prefix || entry.key().starts_with(&nested) {
                entry.invalidated = true;
                entry.in_flight = None;
                count += 1;
            }
        }
        count
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.entries.remove(key.as_str()).is_some()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drops entries idle for longer than `gc_after`, then the least recently
    /// read ones until the cache fits its capacity. The capacity pass skips
    /// entries with a request in flight, the idle pass does not: a request
    /// nobody read for `gc_after` was abandoned. Returns the number of
    /// entries dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let gc_after = self.inner.config.gc_after;
        let before = self.inner.entries.len();

        self.inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_access) < gc_after);

        let capacity = self.inner.config.capacity;
        if self.inner.entries.len() > capacity {
            let mut idle: Vec<(String, Instant)> = self
                .inner
                .entries
                .iter()
                .filter(|e| e.in_flight.is_none())
                .map(|e| (e.key().clone(), e.last_access))
                .collect();
            idle.sort_by_key(|(_, at)| *at);
            let excess = self.inner.entries.len() - capacity;
            for (key, _) in idle.into_iter().take(excess) {
                self.inner.entries.remove(&key);
            }
        }

        let evicted = before.saturating_sub(self.inner.entries.len());
        if evicted > 0 {
            debug!(evicted, "evicted idle query cache entries");
        }
        evicted
    }

    /// Runs `evict_expired` every `interval` until the handle is aborted.
    pub fn spawn_janitor(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.evict_expired();
            }
        })
    }
}
