//! Redis cache store.
//!
//! Values are stored as JSON text. Payloads written by other clients that are
//! not valid JSON come back as `Value::String`.

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheStore, ValueProducer};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Longest TTL sent as `PX`. Redis rejects expiry times that overflow its
/// millisecond clock, so anything longer is written without an expiry.
const MAX_PX_MILLIS: u64 = i64::MAX as u64 / 2;

/// Redis cache store.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tagcache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = RedisConfig::builder().database(1).build();
    ///     let store = RedisStore::connect(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: RedisConfig) -> CacheResult<Self> {
        let url = config.connection_url()?;
        let client =
            Client::open(url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            CacheError::Connection(format!(
                "timed out after {:?} connecting to {}",
                config.connection_timeout, config.url
            ))
        })?
        .map_err(|e| CacheError::Connection(e.to_string()))?;

        let store = Self { connection, config };

        if let Some(name) = &store.config.connection_name {
            let mut conn = store.connection.clone();
            let _: () = redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(name)
                .query_async(&mut conn)
                .await?;
        }

        info!(
            url = %store.config.url,
            database = ?store.config.database,
            "Redis cache store connected"
        );

        Ok(store)
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn encode(value: &Value) -> CacheResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(raw: String) -> Value {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    }

    fn set_cmd(key: &str, payload: String, ttl: Option<Duration>) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        let millis = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| u64::try_from(ttl.as_millis()).ok())
            .filter(|millis| *millis <= MAX_PX_MILLIS);
        if let Some(millis) = millis {
            // PX keeps sub-second TTLs; a zero millisecond count is rejected by Redis.
            cmd.arg("PX").arg(millis.max(1));
        }
        cmd
    }

    async fn set_nx(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let mut cmd = Self::set_cmd(key, Self::encode(value)?, ttl);
        cmd.arg("NX");
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let raw: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        Ok(raw.into_iter().map(|v| v.map(Self::decode)).collect())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.map(Self::decode))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = Self::set_cmd(key, Self::encode(&value)?, ttl)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_not_exist(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        self.set_nx(key, &value, ttl).await
    }

    async fn get_or_set_with_lock(
        &self,
        key: &str,
        producer: ValueProducer,
        ttl: Option<Duration>,
    ) -> CacheResult<Value> {
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }

        let value = producer().await?;
        if value.is_null() {
            return Ok(value);
        }

        // SET NX arbitrates between racing producers; the loser adopts the winner's value.
        if self.set_nx(key, &value, ttl).await? {
            return Ok(value);
        }
        debug!(key, "Lost get_or_set race, reading stored value");
        Ok(self.get(key).await?.unwrap_or(value))
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn remove(&self, keys: &[String]) -> CacheResult<Option<Value>> {
        if keys.is_empty() {
            return Ok(None);
        }

        let values = self.mget(keys).await?;
        let last = values.into_iter().flatten().next_back();

        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let mut conn = self.connection.clone();
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(last)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys("*").await?;
        Ok(keys)
    }

    async fn values(&self) -> CacheResult<Vec<Value>> {
        let keys = self.keys().await?;
        Ok(self.mget(&keys).await?.into_iter().flatten().collect())
    }

    async fn data(&self) -> CacheResult<HashMap<String, Value>> {
        let keys = self.keys().await?;
        let values = self.mget(&keys).await?;
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    async fn size(&self) -> CacheResult<usize> {
        let mut conn = self.connection.clone();
        let size: usize = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_and_raw() {
        assert_eq!(RedisStore::decode(r#"{"a":1}"#.to_string()), json!({"a": 1}));
        assert_eq!(RedisStore::decode("42".to_string()), json!(42));
        assert_eq!(
            RedisStore::decode("plain text".to_string()),
            json!("plain text")
        );
    }

    #[test]
    fn test_encode_string_membership_round_trips() {
        let encoded = json!(r#"["a","b"]"#);
        let payload = RedisStore::encode(&encoded).unwrap();
        assert_eq!(RedisStore::decode(payload), encoded);
    }

    #[test]
    fn test_set_cmd_ttl() {
        let packed = RedisStore::set_cmd("k", "1".into(), Some(Duration::from_millis(1500)))
            .get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.contains("PX"));
        assert!(text.contains("1500"));

        let packed = RedisStore::set_cmd("k", "1".into(), Some(Duration::ZERO))
            .get_packed_command();
        assert!(!String::from_utf8_lossy(&packed).contains("PX"));
    }

    #[test]
    fn test_set_cmd_unbounded_ttl_has_no_expiry() {
        let packed = RedisStore::set_cmd("k", "1".into(), Some(Duration::MAX))
            .get_packed_command();
        assert!(!String::from_utf8_lossy(&packed).contains("PX"));

        let past_redis_clock = Duration::from_secs(u64::MAX / 1000);
        let packed = RedisStore::set_cmd("k", "1".into(), Some(past_redis_clock))
            .get_packed_command();
        assert!(!String::from_utf8_lossy(&packed).contains("PX"));

        let packed = RedisStore::set_cmd("k", "v".into(), Some(Duration::from_micros(10)))
            .get_packed_command();
        assert!(String::from_utf8_lossy(&packed).ends_with("PX\r\n$1\r\n1\r\n"));
    }
}
