//! In-process cache store.

use crate::error::CacheResult;
use crate::traits::{CacheStore, ValueProducer};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// In-memory cache store.
///
/// Expired entries are invisible to every read, but nothing reclaims them on
/// its own: an expired key stays in memory until it is overwritten, removed,
/// or purged. Long-lived stores with TTL'd keys should run
/// [`purge_expired`](Self::purge_expired) periodically, most simply through
/// [`spawn_purge_task`](Self::spawn_purge_task).
///
/// ```no_run
/// use std::time::Duration;
/// use tagcache::MemoryStore;
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     let purger = store.spawn_purge_task(Duration::from_secs(60));
///     // ... use the store ...
///     purger.abort();
/// }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        // A deadline past the clock's range never arrives.
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| Instant::now().checked_add(ttl));
        Self { value, expires_at }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl MemoryStore {
    /// Create new in-memory store
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with room for `capacity` entries before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::with_capacity(capacity))),
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        let before = data.len();
        let now = Instant::now();
        data.retain(|_, entry| entry.is_live(now));
        let purged = before - data.len();
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    /// Run [`purge_expired`](Self::purge_expired) every `period` on the tokio
    /// runtime.
    ///
    /// The task holds only a weak reference and exits once every clone of the
    /// store has been dropped.
    pub fn spawn_purge_task(&self, period: Duration) -> JoinHandle<()> {
        let data = Arc::downgrade(&self.data);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(data) = Weak::upgrade(&data) else {
                    break;
                };
                Self { data }.purge_expired().await;
            }
        })
    }

    async fn live_entries<T>(&self, f: impl Fn(&String, &CacheEntry) -> T) -> Vec<T> {
        let data = self.data.read().await;
        let now = Instant::now();
        data.iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| f(key, entry))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = CacheEntry::new(value, ttl);
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_not_exist(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut data = self.data.write().await;
        if data
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now()))
        {
            return Ok(false);
        }
        data.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(true)
    }

    async fn get_or_set_with_lock(
        &self,
        key: &str,
        producer: ValueProducer,
        ttl: Option<Duration>,
    ) -> CacheResult<Value> {
        let mut data = self.data.write().await;
        if let Some(entry) = data.get(key)
            && entry.is_live(Instant::now())
        {
            return Ok(entry.value.clone());
        }

        // Holding the write guard across the producer keeps other writers out.
        let value = producer().await?;
        if !value.is_null() {
            data.insert(key.to_string(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(value)
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.get(key).await.map(|v| v.is_some())
    }

    async fn remove(&self, keys: &[String]) -> CacheResult<Option<Value>> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let mut last = None;
        for key in keys {
            if let Some(entry) = data.remove(key)
                && entry.is_live(now)
            {
                last = Some(entry.value);
            }
        }
        Ok(last)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.live_entries(|key, _| key.clone()).await)
    }

    async fn values(&self) -> CacheResult<Vec<Value>> {
        Ok(self.live_entries(|_, entry| entry.value.clone()).await)
    }

    async fn data(&self) -> CacheResult<HashMap<String, Value>> {
        Ok(self
            .live_entries(|key, entry| (key.clone(), entry.value.clone()))
            .await
            .into_iter()
            .collect())
    }

    async fn size(&self) -> CacheResult<usize> {
        Ok(self.live_entries(|_, _| ()).await.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
