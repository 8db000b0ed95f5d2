use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde_json::Value;
use tracing::debug;

use super::CacheBackend;
use crate::errors::{AppError, Result};

/// Shared artifact cache in Redis.
///
/// Values are JSON strings stored without expiry under `key_prefix`.
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Open a managed connection (reconnects on failure)
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::Cache {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| AppError::Cache {
            message: format!("Failed to connect to Redis: {}", e),
        })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn prefixed_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", self.key_prefix)).await?;
        Ok(keys)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await?;
        match value {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::Cache {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();
        let _: () = conn.set(&full_key, value.to_string()).await?;
        debug!(key = %full_key, "Cache set");
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let keys = self.prefixed_keys().await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(&keys).await?;
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.prefixed_keys().await?.len())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
