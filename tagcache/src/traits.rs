//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Deferred value computation used by the `get_or_set_with*` family.
///
/// The producer only runs when the key is absent. A producer that yields
/// `Value::Null` leaves the store untouched.
pub type ValueProducer = Box<dyn FnOnce() -> BoxFuture<'static, CacheResult<Value>> + Send>;

/// Box an async closure into a [`ValueProducer`].
///
/// # Examples
///
/// ```
/// use tagcache::producer;
/// use serde_json::json;
///
/// let p = producer(|| async { Ok(json!({"name": "John"})) });
/// ```
pub fn producer<F, Fut>(f: F) -> ValueProducer
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CacheResult<Value>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Backend capability required by [`TaggedCache`](crate::TaggedCache).
///
/// Keys arriving here are already namespace-prefixed. Values must round-trip
/// structurally. A TTL of `None` or zero means the entry never expires.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache.
    ///
    /// Returns `Ok(None)` if the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Set a value in the cache.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The value to store
    /// * `ttl` - Optional time-to-live duration
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()>;

    /// Set a value only if the key is absent.
    ///
    /// Returns `true` if the write happened.
    async fn set_if_not_exist(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Return the cached value, or store `value` and return it.
    async fn get_or_set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<Value> {
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }
        if !value.is_null() {
            self.set(key, value.clone(), ttl).await?;
        }
        Ok(value)
    }

    /// Return the cached value, or compute it with `producer`, store and return it.
    ///
    /// Concurrent callers may each run their producer for the same key.
    async fn get_or_set_with(
        &self,
        key: &str,
        producer: ValueProducer,
        ttl: Option<Duration>,
    ) -> CacheResult<Value> {
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }
        let value = producer().await?;
        if !value.is_null() {
            self.set(key, value.clone(), ttl).await?;
        }
        Ok(value)
    }

    /// Like [`get_or_set_with`](Self::get_or_set_with), but `producer` runs
    /// under the store's write lock for `key`, so at most one producer per key
    /// wins.
    async fn get_or_set_with_lock(
        &self,
        key: &str,
        producer: ValueProducer,
        ttl: Option<Duration>,
    ) -> CacheResult<Value>;

    /// Check if a key exists in the cache.
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Delete keys from the cache.
    ///
    /// Returns the value held by the last listed key that existed. Deleting an
    /// absent key is a no-op.
    async fn remove(&self, keys: &[String]) -> CacheResult<Option<Value>>;

    /// Clear all keys from the cache.
    ///
    /// **Warning:** This is not scoped to any namespace.
    async fn clear(&self) -> CacheResult<()>;

    /// All keys in the cache.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// All values in the cache.
    async fn values(&self) -> CacheResult<Vec<Value>>;

    /// A copy of every key-value pair in the cache.
    async fn data(&self) -> CacheResult<HashMap<String, Value>>;

    /// Number of live entries in the cache.
    async fn size(&self) -> CacheResult<usize>;

    /// Name of the backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Get multiple keys in parallel.
    ///
    /// Returns values in the same order as `keys`; `None` marks a miss.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<Value>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get(key));
        try_join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// Store that only implements the required methods, to exercise defaults.
    #[derive(Default)]
    struct MockStore {
        data: RwLock<HashMap<String, Value>>,
        sets: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for MockStore {
        async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
            Ok(self.data.read().await.get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> CacheResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.data.write().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn set_if_not_exist(
            &self,
            key: &str,
            value: Value,
            _ttl: Option<Duration>,
        ) -> CacheResult<bool> {
            let mut data = self.data.write().await;
            if data.contains_key(key) {
                return Ok(false);
            }
            data.insert(key.to_string(), value);
            Ok(true)
        }

        async fn get_or_set_with_lock(
            &self,
            key: &str,
            producer: ValueProducer,
            ttl: Option<Duration>,
        ) -> CacheResult<Value> {
            self.get_or_set_with(key, producer, ttl).await
        }

        async fn contains(&self, key: &str) -> CacheResult<bool> {
            Ok(self.data.read().await.contains_key(key))
        }

        async fn remove(&self, keys: &[String]) -> CacheResult<Option<Value>> {
            let mut data = self.data.write().await;
            let mut last = None;
            for key in keys {
                if let Some(value) = data.remove(key) {
                    last = Some(value);
                }
            }
            Ok(last)
        }

        async fn clear(&self) -> CacheResult<()> {
            self.data.write().await.clear();
            Ok(())
        }

        async fn keys(&self) -> CacheResult<Vec<String>> {
            Ok(self.data.read().await.keys().cloned().collect())
        }

        async fn values(&self) -> CacheResult<Vec<Value>> {
            Ok(self.data.read().await.values().cloned().collect())
        }

        async fn data(&self) -> CacheResult<HashMap<String, Value>> {
            Ok(self.data.read().await.clone())
        }

        async fn size(&self) -> CacheResult<usize> {
            Ok(self.data.read().await.len())
        }

        fn backend_name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_default_get_or_set_keeps_existing() {
        let store = MockStore::default();
        store.set("k", json!(1), None).await.unwrap();

        let value = store.get_or_set("k", json!(2), None).await.unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_get_or_set_null_is_not_stored() {
        let store = MockStore::default();

        let value = store.get_or_set("k", Value::Null, None).await.unwrap();
        assert_eq!(value, Value::Null);
        assert!(!store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_get_or_set_with_runs_producer_once() {
        let store = MockStore::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = store
                .get_or_set_with(
                    "k",
                    producer(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("computed"))
                    }),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(value, json!("computed"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_get_many_preserves_order() {
        let store = MockStore::default();
        store.set("a", json!("A"), None).await.unwrap();
        store.set("c", json!("C"), None).await.unwrap();

        let values = store.get_many(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values, vec![Some(json!("A")), None, Some(json!("C"))]);
    }
}
