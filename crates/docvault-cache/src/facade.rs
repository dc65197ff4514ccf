//! Cache facade: TTL tiers, JSON envelopes, and the local fast-path.

use crate::store::{CacheStore, MemoryStore};
use crate::transaction::CacheTransaction;
use crate::{CacheError, Result};
use docvault_core::{
    CacheBackendKind, CacheNamespace, CacheSettings, Clock, TenantId, TierConfig, WallClock,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const NANOS_PER_MILLI: u64 = 1_000_000;
const EPOCH_STRIPES: usize = 64;

/// What actually lands in the store.
///
/// `inserted_at` lets any process decide staleness against the namespace
/// TTL regardless of how the store itself expires keys.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    inserted_at: u64,
    value: Value,
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Value,
    inserted_at: u64,
}

/// Local fast-path entries plus per-stripe write epochs.
///
/// Keys hash onto a fixed set of stripes. Every write bumps its stripe
/// before and after the store call, and a store read only fills this tier
/// if the stripe epoch did not move while the read was in flight. A value
/// read before an overlapping `put` or `evict` therefore never lands here
/// after that write.
struct LocalTier {
    entries: LruCache<String, LocalEntry>,
    epochs: [u64; EPOCH_STRIPES],
}

impl LocalTier {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            epochs: [0; EPOCH_STRIPES],
        }
    }

    fn invalidate(&mut self, store_key: &str, stripe: usize) -> u64 {
        self.entries.pop(store_key);
        self.epochs[stripe] = self.epochs[stripe].wrapping_add(1);
        self.epochs[stripe]
    }
}

/// Hit/miss counters for one facade.
#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the facade counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub local_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub errors: u64,
}

/// Namespace-aware cache over a [`CacheStore`].
///
/// All reads consult the local LRU tier (when enabled) before the store;
/// all writes go to the store first and only reach the local tier once the
/// store accepted them, so a failed `put` leaves nothing behind. Writes
/// that overlap on one key leave the local tier empty for that key.
pub struct CacheFacade {
    store: Arc<dyn CacheStore>,
    tiers: TierConfig,
    local: Option<Mutex<LocalTier>>,
    stripes: RandomState,
    local_ttl: Duration,
    op_timeout: Duration,
    key_prefix: String,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl std::fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFacade")
            .field("store", &self.store.name())
            .field("local_tier", &self.local.is_some())
            .field("op_timeout", &self.op_timeout)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl CacheFacade {
    /// Create a facade over `store` using the TTL table and limits in `settings`.
    pub fn new(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        let local = NonZeroUsize::new(settings.local_capacity)
            .map(|capacity| Mutex::new(LocalTier::new(capacity)));
        Self {
            store,
            tiers: settings.tiers.clone(),
            local,
            stripes: RandomState::new(),
            local_ttl: settings.local_ttl,
            op_timeout: settings.op_timeout,
            key_prefix: settings.key_prefix.clone(),
            clock: Arc::new(WallClock),
            counters: Counters::default(),
        }
    }

    /// Pick the store variant named by `settings.backend`.
    ///
    /// The in-process store is already local, so it runs without the extra
    /// LRU tier.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        match &settings.backend {
            CacheBackendKind::Memory => {
                let settings = settings.clone().without_local_tier();
                Ok(Self::new(Arc::new(MemoryStore::new()), &settings))
            }
            #[cfg(feature = "redis")]
            CacheBackendKind::Redis { url } => {
                let store = crate::redis_store::RedisStore::connect(url).await?;
                Ok(Self::new(Arc::new(store), settings))
            }
            #[cfg(not(feature = "redis"))]
            CacheBackendKind::Redis { .. } => Err(CacheError::Unavailable(
                "built without the `redis` feature".to_string(),
            )),
        }
    }

    /// Replace the wall clock used to stamp and age entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tiers(&self) -> &TierConfig {
        &self.tiers
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            store_hits: self.counters.store_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Look up `key` in `namespace`.
    ///
    /// Entries older than the namespace TTL are reported absent and evicted.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<T>> {
        let store_key = self.store_key(namespace, key);
        let ttl = self.tiers.ttl(namespace);
        let now = self.now_millis();

        if let Some(value) = self.local_get(&store_key, ttl, now) {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = %namespace, key = %key, "Cache hit (local)");
            return Ok(Some(serde_json::from_value(value)?));
        }

        let epoch = self.local_epoch(&store_key);
        let bytes = match self.bounded(self.store.get(&store_key)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let Some(bytes) = bytes else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = %namespace, key = %key, "Cache miss");
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if is_expired(envelope.inserted_at, now, ttl) {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = %namespace, key = %key, "Cache entry expired");
            if let Err(e) = self.bounded(self.store.evict(&store_key)).await {
                debug!(namespace = %namespace, key = %key, error = %e, "Lazy eviction failed");
            }
            return Ok(None);
        }

        self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
        debug!(namespace = %namespace, key = %key, "Cache hit (store)");
        let value: T = serde_json::from_value(envelope.value.clone())?;
        let entry = LocalEntry {
            value: envelope.value,
            inserted_at: envelope.inserted_at,
        };
        self.local_fill(store_key, entry, epoch);
        Ok(Some(value))
    }

    /// Store `value` under `key` with the namespace TTL.
    ///
    /// A value that serializes to JSON `null` (such as `None`) is not
    /// stored; absence is the only miss representation.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.put_value(namespace, key, value).await
    }

    /// Remove `key` from every tier immediately.
    pub async fn evict(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
        let store_key = self.store_key(namespace, key);
        self.local_invalidate(&store_key);
        let evicted = self.bounded(self.store.evict(&store_key)).await;
        // A read that fetched the old value may have filled in the meantime
        self.local_invalidate(&store_key);
        evicted.inspect_err(|_| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        })?;
        debug!(namespace = %namespace, key = %key, "Cache entry evicted");
        Ok(())
    }

    /// Cache-aside read.
    ///
    /// Returns the cached value when present. Otherwise runs `loader`
    /// against the system of record and caches a `Some` result. Cache
    /// failures are logged and treated as misses; only loader errors
    /// propagate.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        loader: F,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        match self.get::<T>(namespace, key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "Cache read degraded, falling through to source"
                );
            }
        }

        let loaded = loader().await?;
        if let Some(value) = &loaded {
            if let Err(e) = self.put(namespace, key, value).await {
                warn!(
                    namespace = %namespace,
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "Cache populate degraded"
                );
            }
        }
        Ok(loaded)
    }

    /// Start buffering writes that belong to a backing-store transaction.
    pub fn begin(&self) -> CacheTransaction<'_> {
        CacheTransaction::new(self)
    }

    /// View of this cache with every key scoped to `tenant`.
    pub fn for_tenant(&self, tenant: &TenantId) -> TenantCache<'_> {
        TenantCache {
            facade: self,
            tenant: tenant.clone(),
        }
    }

    pub(crate) async fn put_value(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: Value,
    ) -> Result<()> {
        if value.is_null() {
            debug!(namespace = %namespace, key = %key, "Skipping null cache value");
            return Ok(());
        }

        let store_key = self.store_key(namespace, key);
        let inserted_at = self.now_millis();
        let envelope = Envelope { inserted_at, value };
        let bytes = serde_json::to_vec(&envelope)?;

        let epoch = self.local_invalidate(&store_key);
        let stored = self
            .bounded(self.store.put(&store_key, bytes, self.tiers.ttl(namespace)))
            .await;
        let entry = stored.is_ok().then(|| LocalEntry {
            value: envelope.value,
            inserted_at,
        });
        self.local_settle(store_key, entry, epoch);

        stored.inspect_err(|_| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        })?;
        Ok(())
    }

    fn store_key(&self, namespace: CacheNamespace, key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, namespace.as_str(), key)
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_nanos() / NANOS_PER_MILLI
    }

    fn stripe(&self, store_key: &str) -> usize {
        (self.stripes.hash_one(store_key) % EPOCH_STRIPES as u64) as usize
    }

    fn local_get(&self, store_key: &str, ttl: Duration, now: u64) -> Option<Value> {
        let local = self.local.as_ref()?;
        let mut local = local.lock();
        let entry = local.entries.get(store_key)?;
        if is_expired(entry.inserted_at, now, ttl.min(self.local_ttl)) {
            local.entries.pop(store_key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Epoch to hand back to [`Self::local_fill`] once a store read returns.
    fn local_epoch(&self, store_key: &str) -> Option<u64> {
        let local = self.local.as_ref()?;
        let stripe = self.stripe(store_key);
        Some(local.lock().epochs[stripe])
    }

    /// Drop the local copy of `store_key` and open a new write epoch.
    fn local_invalidate(&self, store_key: &str) -> Option<u64> {
        let local = self.local.as_ref()?;
        let stripe = self.stripe(store_key);
        Some(local.lock().invalidate(store_key, stripe))
    }

    /// Fill from a store read that started at `epoch`.
    fn local_fill(&self, store_key: String, entry: LocalEntry, epoch: Option<u64>) {
        let (Some(local), Some(epoch)) = (&self.local, epoch) else {
            return;
        };
        let stripe = self.stripe(&store_key);
        let mut local = local.lock();
        if local.epochs[stripe] == epoch {
            local.entries.put(store_key, entry);
        }
    }

    /// Close a write opened by [`Self::local_invalidate`]. The written value
    /// is kept only when no other write on the stripe overlapped this one.
    fn local_settle(&self, store_key: String, entry: Option<LocalEntry>, epoch: Option<u64>) {
        let (Some(local), Some(epoch)) = (&self.local, epoch) else {
            return;
        };
        let stripe = self.stripe(&store_key);
        let mut local = local.lock();
        let uncontended = local.epochs[stripe] == epoch;
        local.invalidate(&store_key, stripe);
        if let (true, Some(entry)) = (uncontended, entry) {
            local.entries.put(store_key, entry);
        }
    }

    /// Bound a store call by the configured timeout.
    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }
}

fn is_expired(inserted_at_millis: u64, now_millis: u64, ttl: Duration) -> bool {
    let age = now_millis.saturating_sub(inserted_at_millis);
    u128::from(age) > ttl.as_millis()
}

/// Tenant-scoped view of a [`CacheFacade`].
///
/// Keys are prefixed with the tenant identifier so two tenants never share
/// an entry.
#[derive(Debug)]
pub struct TenantCache<'a> {
    facade: &'a CacheFacade,
    tenant: TenantId,
}

impl TenantCache<'_> {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}/{}", self.tenant, key)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<T>> {
        self.facade.get(namespace, &self.scoped(key)).await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.facade.put(namespace, &self.scoped(key), value).await
    }

    pub async fn evict(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
        self.facade.evict(namespace, &self.scoped(key)).await
    }

    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        loader: F,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        self.facade
            .get_or_load(namespace, &self.scoped(key), loader)
            .await
    }
}
