//! Dedup cache for side effects that must run at most once per window
//!
//! Provides:
//! - `DedupCache` trait with an atomic set-if-absent `claim`
//! - Redis-backed `Cache` (`SET NX EX`, prefixed keys)
//! - Process-local `MemoryCache` for single-node and test setups

use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Atomic claim of a key for a bounded time window
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Claim `key` for `ttl`. Returns `true` if this caller won the claim,
    /// `false` if the key is already held.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Redis cache client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl Cache {
    /// Connect to Redis at `url`
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl DedupCache for Cache {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to claim key '{}': {}", full_key, e),
            })?;

        let claimed = reply.is_some();
        metrics::record_cache(!claimed, "dedup");
        debug!(key = %full_key, claimed, "Dedup claim");
        Ok(claimed)
    }
}

/// In-process dedup cache with per-key expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires_at| *expires_at > now);

        let claimed = !entries.contains_key(key);
        if claimed {
            entries.insert(key.to_string(), now + ttl);
        }

        metrics::record_cache(!claimed, "dedup");
        Ok(claimed)
    }
}

/// Cache key builder helpers
pub mod keys {
    /// Key guarding persistence of a general-knowledge answer
    pub fn fallback_answer(query_fingerprint: &str) -> String {
        format!("fallback:{}", query_fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::fallback_answer("abc123"), "fallback:abc123");
    }

    #[tokio::test]
    async fn test_memory_claim_is_exclusive() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.claim("fallback:q", ttl).await.unwrap());
        assert!(!cache.claim("fallback:q", ttl).await.unwrap());
        assert!(cache.claim("fallback:other", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_claim_expires() {
        let cache = MemoryCache::new();
        assert!(cache.claim("k", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.claim("k", Duration::from_millis(10)).await.unwrap());
    }
}
