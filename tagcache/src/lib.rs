//! Tag-aware cache facade.
//!
//! Wraps a key-value cache backend, prefixes every key with a namespace, and
//! keeps a per-tag membership list in the backend so all entries under a tag
//! can be invalidated with one call.
//!
//! # Features
//!
//! - `redis` - Enable the Redis backend (enabled by default)
//! - **In-memory backend** - [`MemoryStore`], always available
//! - **Tag-based invalidation** - [`TaggedCache::remove_by_tag`]
//!
//! # Examples
//!
//! ## In-memory Cache
//!
//! ```
//! use tagcache::*;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let cache = TaggedCache::memory("prefix");
//!
//! cache.set("person01", json!({"name": "John", "age": 10}), None, Some("tag_person")).await?;
//! cache.set("family01", json!({"address": "Kan Yun street"}), None, Some("tag_family")).await?;
//!
//! // Drop every entry tagged "tag_person"
//! cache.remove_by_tag("tag_person").await;
//!
//! // Or several tags at once
//! cache.remove_by_tags(&["tag_person", "tag_family"]).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Redis Cache
//!
//! ```no_run
//! use tagcache::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let redis = RedisConfig::builder()
//!         .url("redis://127.0.0.1:6379")
//!         .database(1)
//!         .build();
//!     let cache = TaggedCache::redis("prefix", &redis).await?;
//!
//!     cache.set("session:1", json!("token"), Some(Duration::from_secs(60)), Some("sessions")).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod membership;
pub mod memory;
pub mod tagged;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::{CacheBackend, CacheConfig, RedisConfig, RedisConfigBuilder};
pub use error::{CacheError, CacheResult};
pub use memory::MemoryStore;
pub use tagged::TaggedCache;
pub use traits::{CacheStore, ValueProducer, producer};

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CacheBackend, CacheConfig, RedisConfig};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::memory::MemoryStore;
    pub use crate::tagged::TaggedCache;
    pub use crate::traits::CacheStore;

    #[cfg(feature = "redis")]
    pub use crate::redis_store::RedisStore;
}
