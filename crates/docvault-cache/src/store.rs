//! Store abstraction behind the cache facade.

use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use docvault_core::{Clock, WallClock};
use std::sync::Arc;
use std::time::Duration;

/// Backend abstraction for cached bytes
///
/// Implementations handle different storage mechanisms:
/// - In-process map (single node, tests, degraded environments)
/// - Redis (shared across gateway replicas)
///
/// Keys arrive fully qualified and are treated as opaque. A `put` must
/// replace the previous value whole or not at all.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn evict(&self, key: &str) -> Result<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at_nanos: u64,
}

impl StoredValue {
    /// A value is still live at exactly its TTL, matching the facade.
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_nanos < now
    }
}

/// Single-tier in-process store
///
/// Satisfies the same contract as the distributed store without any
/// network dependency. Expired values are dropped lazily on read, or in
/// bulk through [`MemoryStore::purge_expired`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(WallClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored keys, including any not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_nanos();
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_nanos();
        // Lookup and expiry removal go through one shard lock
        let removed = self
            .entries
            .remove_if(key, |_, stored| stored.is_expired(now));
        if removed.is_some() {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|stored| stored.bytes.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        let stored = StoredValue {
            bytes: value,
            expires_at_nanos: self.clock.now_nanos().saturating_add(ttl_nanos),
        };
        self.entries.insert(key.to_string(), stored);
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_core::ManualClock;

    fn store_with_clock() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::starting_at(Duration::from_secs(1_000));
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, _clock) = store_with_clock();
        store
            .put("k", b"value".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_replaces_value() {
        let (store, _clock) = store_with_clock();
        store.put("k", b"one".to_vec(), Duration::from_secs(10)).await.unwrap();
        store.put("k", b"two".to_vec(), Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_values_are_dropped_on_read() {
        let (store, clock) = store_with_clock();
        store.put("k", b"v".to_vec(), Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_nanos(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evict_missing_key_is_ok() {
        let (store, _clock) = store_with_clock();
        assert!(store.evict("nothing-here").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        store.put("short", b"a".to_vec(), Duration::from_secs(1)).await.unwrap();
        store.put("long", b"b".to_vec(), Duration::from_secs(100)).await.unwrap();

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.purge_expired(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }
}
