//! Redis-backed cache store.

use crate::{CacheError, CacheStore, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Distributed store shared by every gateway replica.
///
/// Values are written with `PSETEX`, so Redis expires them natively at the
/// namespace TTL; the facade still checks the envelope age on read.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis connect failed: {}", e)))?;
        info!(url = %url, "Connected to Redis cache store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis get failed: {}", e)))?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // PSETEX rejects 0
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn
            .pset_ex(key, value, millis)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis set failed: {}", e)))?;
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis delete failed: {}", e)))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
