//! DocVault Cache
//!
//! Namespace-aware cache facade over a pluggable store.
//!
//! - [`CacheFacade`] applies the per-namespace TTL table, serializes values
//!   as JSON envelopes, and fronts the store with an optional local LRU tier.
//! - [`CacheStore`] is the backend capability set (`get`, `put`, `evict`).
//!   [`MemoryStore`] is the single-tier in-process variant;
//!   `RedisStore` (feature `redis`) is the distributed one.
//! - [`CacheTransaction`] defers writes until the surrounding
//!   backing-store transaction commits.
//!
//! The backend is chosen once at startup with [`CacheFacade::from_settings`].

mod facade;
mod store;
mod transaction;

#[cfg(feature = "redis")]
mod redis_store;

pub use facade::{CacheFacade, CacheStats, TenantCache};
pub use store::{CacheStore, MemoryStore};
pub use transaction::CacheTransaction;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use std::time::Duration;

/// Errors that can occur in cache operations
///
/// None of these should fail a request: callers treat them as a miss and
/// fall through to the system of record.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
