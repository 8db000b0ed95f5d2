//! Artifact caching
//!
//! Provides:
//! - A backend trait over JSON values with explicit `clear`
//! - An in-process bounded LRU cache (no TTL)
//! - A shared Redis cache (no expiry)
//! - Key builders

mod memory;
mod redis_store;

pub use self::memory::BoundedCache;
pub use self::redis_store::RedisCache;

use crate::config::CacheConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Key/value store for finished artifacts.
///
/// Entries are only ever removed by `clear` or capacity eviction.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Remove every entry; returns how many were removed.
    async fn clear(&self) -> Result<u64>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    fn backend(&self) -> &'static str;
}

#[async_trait]
impl CacheBackend for BoundedCache<Value> {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(BoundedCache::get(self, key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        Ok(BoundedCache::clear(self) as u64)
    }

    async fn len(&self) -> Result<usize> {
        Ok(BoundedCache::len(self))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Create the artifact cache based on configuration
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(BoundedCache::<Value>::new(config.max_entries))),
        "redis" => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| AppError::configuration("cache.redis_url is not set"))?;
            let cache = RedisCache::connect(url, &config.key_prefix).await.map_err(|e| {
                AppError::configuration(format!("failed to connect artifact cache: {e}"))
            })?;
            Ok(Arc::new(cache))
        }
        other => Err(AppError::configuration(format!("unknown cache backend '{other}'"))),
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Artifact key: kind, trimmed topic and a digest of the parameter JSON.
    ///
    /// `serde_json` maps are ordered by key, so equal parameters always
    /// serialize to the same bytes.
    pub fn artifact(kind: &str, topic: &str, parameters: &serde_json::Value) -> String {
        let digest = Sha256::digest(parameters.to_string().as_bytes());
        format!("{}:{}:{}", kind, topic.trim(), hex::encode(&digest[..16]))
    }

    /// Query embedding memo key
    pub fn embedding(model: &str, text: &str) -> String {
        format!("embedding:{}:{}", model, text)
    }
}
