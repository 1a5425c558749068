//! Tag-based cache invalidation.
//!
//! [`TaggedCache`] namespaces every key with a prefix and keeps, per tag, a
//! membership list stored in the backend itself under
//! `prefix + "tag_" + tag`. Invalidating a tag walks that list and deletes each
//! member, then the list.
//!
//! # Consistency
//!
//! Index updates and entry writes are two separate backend operations, and
//! neither is rolled back if the other fails. One mutex per facade (shared by
//! clones) serializes the whole body of every tagging call (`set`,
//! `set_with_tags`, `set_if_not_exist`, `get_or_set*`) and of each
//! `remove_by_tag`. Reads, plain removals, `clear` and the listing calls do not
//! take it. Consequences:
//!
//! - `remove` / `removes` leave the key in its tags' lists. A later
//!   `remove_by_tag` deletes the already-absent key, which is a no-op.
//! - Entries expiring by TTL stay listed for the same reason.
//! - Facades built separately over the same store have separate mutexes, so a
//!   tagged write from one may land after another's `remove_by_tag` read the
//!   list, leaving the entry outside the index until it is tagged again.
//! - `set_if_not_exist` records the tag even when the key already existed and
//!   nothing was written.

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheResult;
use crate::membership;
use crate::memory::MemoryStore;
use crate::traits::{CacheStore, ValueProducer, producer};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

#[cfg(not(feature = "redis"))]
use crate::error::CacheError;
#[cfg(feature = "redis")]
use crate::config::RedisConfig;
#[cfg(feature = "redis")]
use crate::redis_store::RedisStore;

/// Cache facade with tag-based invalidation support
#[derive(Clone)]
pub struct TaggedCache {
    /// Underlying cache store
    store: Arc<dyn CacheStore>,

    /// Namespace prefix
    prefix: Arc<str>,

    /// TTL used when a write passes `None`
    default_ttl: Option<Duration>,

    /// Serializes tag index read-modify-write sequences
    tag_lock: Arc<Mutex<()>>,
}

impl TaggedCache {
    /// Create a tagged cache over any store.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tagcache::{MemoryStore, TaggedCache};
    ///
    /// let store = Arc::new(MemoryStore::new());
    /// let users = TaggedCache::new(store.clone(), "users_");
    /// let orders = TaggedCache::new(store, "orders_");
    /// ```
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Arc::from(prefix.into()),
            default_ttl: None,
            tag_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a tagged cache over a fresh in-memory store.
    pub fn memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), prefix)
    }

    /// Create a tagged cache over Redis.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tagcache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let redis = RedisConfig::builder()
    ///         .url("redis://127.0.0.1:6379")
    ///         .database(1)
    ///         .build();
    ///     let cache = TaggedCache::redis("prefix", &redis).await?;
    ///     Ok(())
    /// }
    /// ```
    #[cfg(feature = "redis")]
    pub async fn redis(prefix: impl Into<String>, config: &RedisConfig) -> CacheResult<Self> {
        let store = RedisStore::connect(config.clone()).await?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// Build a tagged cache from configuration.
    pub async fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let cache = match &config.backend {
            CacheBackend::Memory => Self::memory(config.prefix.clone()),
            #[cfg(feature = "redis")]
            CacheBackend::Redis(redis) => Self::redis(config.prefix.clone(), redis).await?,
            #[cfg(not(feature = "redis"))]
            CacheBackend::Redis(_) => {
                return Err(CacheError::Config(
                    "redis backend requires the `redis` feature".to_string(),
                ));
            }
        };

        Ok(match config.default_ttl {
            Some(ttl) => cache.with_default_ttl(ttl),
            None => cache,
        })
    }

    /// Set the TTL applied when a write passes `None`.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Storage key of `tag`, or `None` for an empty tag.
    pub fn tag_key(&self, tag: &str) -> Option<String> {
        membership::tag_key(&self.prefix, tag)
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.default_ttl)
    }

    // ========== Tag index ==========

    /// Add `key` to the membership of `tag`. Caller holds `tag_lock`.
    async fn record_tag(&self, key: &str, tag: &str) -> CacheResult<()> {
        let Some(tag_key) = self.tag_key(tag) else {
            return Ok(());
        };

        let existing = match self.store.get(&tag_key).await? {
            Some(raw) => membership::decode(&tag_key, raw)?,
            None => Vec::new(),
        };

        let members = membership::with_member(key, existing);
        debug!(key, tag, members = members.len(), "Recording tag membership");

        // Membership lists never expire on their own.
        self.store
            .set(&tag_key, membership::encode(&members), None)
            .await
    }

    /// Record `key` under every tag, logging failures. Caller holds `tag_lock`.
    async fn index_tags(&self, key: &str, tags: &[&str]) {
        for tag in tags {
            if let Err(e) = self.record_tag(key, tag).await {
                warn!(key, tag, error = %e, "Failed to update tag index");
            }
        }
    }

    /// Keys currently recorded under `tag`.
    ///
    /// Stale members (removed or expired entries) are included.
    pub async fn tag_members(&self, tag: &str) -> CacheResult<Vec<String>> {
        let Some(tag_key) = self.tag_key(tag) else {
            return Ok(Vec::new());
        };
        match self.store.get(&tag_key).await? {
            Some(raw) => membership::decode(&tag_key, raw),
            None => Ok(Vec::new()),
        }
    }

    // ========== Writes ==========

    /// Set a value, optionally recording it under `tag`.
    ///
    /// The entry does not expire if `ttl` resolves to `None` or zero.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tagcache::*;
    /// # use serde_json::json;
    /// # async fn example() -> CacheResult<()> {
    /// let cache = TaggedCache::memory("prefix");
    /// cache.set("person01", json!({"name": "John", "age": 10}), None, Some("tag_person")).await?;
    /// cache.set("person02", json!({"name": "Jane", "age": 12}), None, Some("tag_person")).await?;
    ///
    /// cache.remove_by_tag("tag_person").await;
    /// assert_eq!(cache.get("person01").await?, None);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> CacheResult<()> {
        self.set_with_tags(key, value, ttl, tag.as_slice()).await
    }

    /// Set a value and record it under every tag in `tags`.
    pub async fn set_with_tags(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> CacheResult<()> {
        let _guard = self.tag_lock.lock().await;
        self.index_tags(key, tags).await;

        let result = self
            .store
            .set(&self.build_key(key), value, self.resolve_ttl(ttl))
            .await;
        if let Err(e) = &result {
            error!(key, error = %e, "Failed to write cache entry");
        }
        result
    }

    /// Set a value only if `key` is absent. Returns whether it was written.
    ///
    /// The tag is recorded even when nothing is written.
    pub async fn set_if_not_exist(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tag: &str,
    ) -> CacheResult<bool> {
        let _guard = self.tag_lock.lock().await;
        self.index_tags(key, &[tag]).await;
        self.store
            .set_if_not_exist(&self.build_key(key), value, self.resolve_ttl(ttl))
            .await
    }

    /// Return the cached value of `key`, or store `value` and return it.
    pub async fn get_or_set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tag: &str,
    ) -> CacheResult<Value> {
        let _guard = self.tag_lock.lock().await;
        self.index_tags(key, &[tag]).await;
        self.store
            .get_or_set(&self.build_key(key), value, self.resolve_ttl(ttl))
            .await
    }

    /// Return the cached value of `key`, or compute it with `f`, store and
    /// return it.
    ///
    /// A `Value::Null` result is returned but not stored.
    pub async fn get_or_set_with<F, Fut>(
        &self,
        key: &str,
        f: F,
        ttl: Option<Duration>,
        tag: &str,
    ) -> CacheResult<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Value>> + Send + 'static,
    {
        self.get_or_set_boxed(key, producer(f), ttl, tag, false)
            .await
    }

    /// Like [`get_or_set_with`](Self::get_or_set_with), but `f` runs while the
    /// store's write lock for `key` is held.
    ///
    /// The guarantee is the store's: the memory store holds its write lock,
    /// the Redis store lets the first `SET NX` win.
    pub async fn get_or_set_with_lock<F, Fut>(
        &self,
        key: &str,
        f: F,
        ttl: Option<Duration>,
        tag: &str,
    ) -> CacheResult<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Value>> + Send + 'static,
    {
        self.get_or_set_boxed(key, producer(f), ttl, tag, true)
            .await
    }

    async fn get_or_set_boxed(
        &self,
        key: &str,
        producer: ValueProducer,
        ttl: Option<Duration>,
        tag: &str,
        locked: bool,
    ) -> CacheResult<Value> {
        let _guard = self.tag_lock.lock().await;
        self.index_tags(key, &[tag]).await;

        let key = self.build_key(key);
        let ttl = self.resolve_ttl(ttl);
        if locked {
            self.store.get_or_set_with_lock(&key, producer, ttl).await
        } else {
            self.store.get_or_set_with(&key, producer, ttl).await
        }
    }

    // ========== Reads ==========

    /// Get the value of `key`. Absence is `Ok(None)`.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.store.get(&self.build_key(key)).await
    }

    /// Check whether `key` exists.
    pub async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.store.contains(&self.build_key(key)).await
    }

    // ========== Removal ==========

    /// Delete `key` and return its previous value.
    ///
    /// Tag memberships are left as they are.
    pub async fn remove(&self, key: &str) -> CacheResult<Option<Value>> {
        self.store.remove(&[self.build_key(key)]).await
    }

    /// Delete `keys`. Failures are logged, not returned.
    pub async fn removes<S: AsRef<str>>(&self, keys: &[S]) {
        if keys.is_empty() {
            return;
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.build_key(k.as_ref())).collect();
        if let Err(e) = self.store.remove(&prefixed).await {
            warn!(count = prefixed.len(), error = %e, "Failed to remove cache entries");
        }
    }

    /// Delete every entry recorded under `tag`, then the tag itself.
    ///
    /// Does nothing if the tag is unknown. If its membership cannot be read or
    /// decoded the failure is logged and nothing is deleted.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tagcache::*;
    /// # use serde_json::json;
    /// # async fn example() -> CacheResult<()> {
    /// let cache = TaggedCache::memory("app_");
    /// cache.set("user:1", json!("Alice"), None, Some("users")).await?;
    ///
    /// // Invalidate all user-related cache entries
    /// cache.remove_by_tag("users").await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn remove_by_tag(&self, tag: &str) {
        let _guard = self.tag_lock.lock().await;

        let Some(tag_key) = self.tag_key(tag) else {
            return;
        };

        let raw = match self.store.get(&tag_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                error!(tag, error = %e, "Failed to read tag membership");
                return;
            }
        };

        let keys = match membership::decode(&tag_key, raw) {
            Ok(keys) => keys,
            Err(e) => {
                error!(tag, error = %e, "Failed to decode tag membership");
                return;
            }
        };

        debug!(tag, members = keys.len(), "Removing entries by tag");
        self.removes(keys.as_slice()).await;

        if let Err(e) = self.store.remove(&[tag_key]).await {
            warn!(tag, error = %e, "Failed to remove tag key");
        }
    }

    /// Apply [`remove_by_tag`](Self::remove_by_tag) to each tag in order.
    ///
    /// Not atomic across tags.
    pub async fn remove_by_tags<S: AsRef<str>>(&self, tags: &[S]) {
        for tag in tags {
            self.remove_by_tag(tag.as_ref()).await;
        }
    }

    // ========== Whole-store passthroughs ==========
    //
    // None of these are scoped to the namespace prefix.

    /// Delete every entry in the store.
    pub async fn clear(&self) -> CacheResult<()> {
        self.store.clear().await
    }

    /// Copy of every key-value pair in the store.
    pub async fn data(&self) -> CacheResult<HashMap<String, Value>> {
        self.store.data().await
    }

    /// Every key in the store, as JSON strings.
    pub async fn keys(&self) -> CacheResult<Vec<Value>> {
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .map(Value::String)
            .collect())
    }

    /// Every key in the store.
    pub async fn key_strings(&self) -> CacheResult<Vec<String>> {
        self.store.keys().await
    }

    /// Every value in the store.
    pub async fn values(&self) -> CacheResult<Vec<Value>> {
        self.store.values().await
    }

    /// Number of entries in the store.
    pub async fn size(&self) -> CacheResult<usize> {
        self.store.size().await
    }
}

impl std::fmt::Debug for TaggedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedCache")
            .field("backend", &self.store.backend_name())
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
