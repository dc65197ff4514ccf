//! Token buckets and the registry that owns them
//!
//! Every request is charged against two buckets: one keyed by tenant and
//! one keyed by endpoint path. Both scopes use the same bucket type with
//! their own [`TokenBucketConfig`].
//!
//! ## Refill model
//!
//! Tokens come back in whole periods only. A bucket configured for
//! 5 tokens per 60s that is drained at t=0 has nothing at t=59.9s and
//! 5 tokens at t=60s. Refill is computed lazily on each consume, so idle
//! buckets cost nothing.
//!
//! ## Memory bounds
//!
//! Buckets are created on first use. When the registry grows past
//! `max_buckets`, buckets that have been idle for `bucket_idle` and have
//! refilled to capacity are dropped. Such a bucket is indistinguishable
//! from the one that would be created on the next request, so the sweep
//! never changes what a caller observes. Automatic sweeps run at most once
//! per tenth of `bucket_idle`, so a flood of new keys against a registry
//! with nothing to reclaim does not scan the map on every request.

use dashmap::DashMap;
use docvault_core::{Clock, MonotonicClock, RateLimitSettings, TokenBucketConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionProbe {
    pub allowed: bool,
    /// Tokens left after this attempt.
    pub remaining: u64,
    /// Nanoseconds until enough tokens exist to satisfy the same request.
    /// Zero when allowed, `u64::MAX` when the request exceeds capacity.
    pub nanos_to_next_refill: u64,
}

impl ConsumptionProbe {
    /// Whole seconds a denied caller should wait, truncated.
    pub fn retry_after_secs(&self) -> u64 {
        self.nanos_to_next_refill / 1_000_000_000
    }
}

#[derive(Debug)]
struct BucketState {
    available: u64,
    /// Start of the current refill period.
    last_refill: u64,
    last_access: u64,
}

/// A capacity-bounded token bucket with interval refill.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    period_nanos: u64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_nanos();
        let period_nanos = u64::try_from(config.refill_period.as_nanos())
            .unwrap_or(u64::MAX)
            .max(1);
        Self {
            config,
            period_nanos,
            state: Mutex::new(BucketState {
                available: config.capacity,
                last_refill: now,
                last_access: now,
            }),
            clock,
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    pub fn try_consume_one(&self) -> ConsumptionProbe {
        self.try_consume(1)
    }

    /// Atomically take `n` tokens if available.
    pub fn try_consume(&self, n: u64) -> ConsumptionProbe {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.last_access = now;

        if n > self.config.capacity {
            return ConsumptionProbe {
                allowed: false,
                remaining: state.available,
                nanos_to_next_refill: u64::MAX,
            };
        }

        if state.available >= n {
            state.available -= n;
            return ConsumptionProbe {
                allowed: true,
                remaining: state.available,
                nanos_to_next_refill: 0,
            };
        }

        let deficit = n - state.available;
        let periods_needed = deficit.div_ceil(self.config.refill_tokens.max(1));
        let into_period = now.saturating_sub(state.last_refill);
        let wait = periods_needed
            .saturating_mul(self.period_nanos)
            .saturating_sub(into_period);

        ConsumptionProbe {
            allowed: false,
            remaining: state.available,
            nanos_to_next_refill: wait,
        }
    }

    /// Current token count after applying any due refill.
    pub fn available_tokens(&self) -> u64 {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.available
    }

    /// True when the bucket has not been used for `idle` and holds its full
    /// capacity.
    pub fn is_full_and_idle(&self, idle: Duration) -> bool {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        let idle_nanos = u64::try_from(idle.as_nanos()).unwrap_or(u64::MAX);
        state.available == self.config.capacity
            && now.saturating_sub(state.last_access) >= idle_nanos
    }

    fn refill(&self, state: &mut BucketState, now: u64) {
        let elapsed = now.saturating_sub(state.last_refill);
        let periods = elapsed / self.period_nanos;
        if periods == 0 {
            return;
        }
        let restored = periods.saturating_mul(self.config.refill_tokens);
        state.available = self
            .config
            .capacity
            .min(state.available.saturating_add(restored));
        state.last_refill = state
            .last_refill
            .saturating_add(periods.saturating_mul(self.period_nanos));
    }
}

/// Which budget a bucket enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketScope {
    Tenant,
    Endpoint,
}

impl BucketScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketScope::Tenant => "tenant",
            BucketScope::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for BucketScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub scope: BucketScope,
    pub identifier: String,
}

impl BucketKey {
    pub fn new(scope: BucketScope, identifier: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.identifier)
    }
}

/// Owner of every token bucket in the process.
pub struct BucketRegistry {
    tenant: TokenBucketConfig,
    endpoint: TokenBucketConfig,
    max_buckets: usize,
    bucket_idle: Duration,
    buckets: DashMap<BucketKey, Arc<TokenBucket>>,
    /// Clock reading before which no automatic sweep runs.
    next_sweep_nanos: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("tenant", &self.tenant)
            .field("endpoint", &self.endpoint)
            .field("max_buckets", &self.max_buckets)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl BucketRegistry {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenant: settings.tenant,
            endpoint: settings.endpoint,
            max_buckets: settings.max_buckets,
            bucket_idle: settings.bucket_idle,
            buckets: DashMap::new(),
            next_sweep_nanos: AtomicU64::new(0),
            clock,
        }
    }

    pub fn config_for(&self, scope: BucketScope) -> &TokenBucketConfig {
        match scope {
            BucketScope::Tenant => &self.tenant,
            BucketScope::Endpoint => &self.endpoint,
        }
    }

    /// Return the bucket for `(scope, identifier)`, creating it on first use.
    ///
    /// The returned handle is not pinned in the registry. Once the bucket is
    /// idle and full a sweep may drop it, after which the registry hands
    /// out a fresh bucket for the same key and charges made through the old
    /// handle are no longer seen by the gate. Charge requests through
    /// [`BucketRegistry::try_consume`]; use this for inspection.
    pub fn get_or_create(&self, scope: BucketScope, identifier: &str) -> Arc<TokenBucket> {
        let key = BucketKey::new(scope, identifier);
        if let Some(bucket) = self.buckets.get(&key) {
            return Arc::clone(bucket.value());
        }
        self.sweep_if_needed();
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| self.new_bucket(scope));
        Arc::clone(bucket.value())
    }

    /// Charge `n` tokens to `(scope, identifier)`.
    ///
    /// The map guard is held while consuming, so a concurrent sweep cannot
    /// drop the bucket between lookup and consumption.
    pub fn try_consume(&self, scope: BucketScope, identifier: &str, n: u64) -> ConsumptionProbe {
        let key = BucketKey::new(scope, identifier);
        if let Some(bucket) = self.buckets.get(&key) {
            return bucket.try_consume(n);
        }
        self.sweep_if_needed();
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| self.new_bucket(scope));
        bucket.try_consume(n)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop idle, full buckets. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.buckets.len();
        let idle = self.bucket_idle;
        self.buckets
            .retain(|_, bucket| !bucket.is_full_and_idle(idle));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Swept idle rate limit buckets");
        }
        removed
    }

    fn sweep_if_needed(&self) {
        if self.buckets.len() < self.max_buckets {
            return;
        }
        let now = self.clock.now_nanos();
        let due = self.next_sweep_nanos.load(Ordering::Acquire);
        if now < due {
            return;
        }
        let interval = u64::try_from((self.bucket_idle / 10).as_nanos()).unwrap_or(u64::MAX);
        // One caller per interval wins the sweep
        if self
            .next_sweep_nanos
            .compare_exchange(
                due,
                now.saturating_add(interval),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.sweep();
        }
    }

    fn new_bucket(&self, scope: BucketScope) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(
            *self.config_for(scope),
            Arc::clone(&self.clock),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_core::ManualClock;

    const SECOND: u64 = 1_000_000_000;

    fn bucket(capacity: u64, period_secs: u64) -> (TokenBucket, ManualClock) {
        let clock = ManualClock::new();
        let config = TokenBucketConfig::per_period(capacity, Duration::from_secs(period_secs));
        (TokenBucket::new(config, Arc::new(clock.clone())), clock)
    }

    fn settings(tenant_capacity: u64, endpoint_capacity: u64) -> RateLimitSettings {
        RateLimitSettings::default()
            .with_tenant(TokenBucketConfig::per_period(
                tenant_capacity,
                Duration::from_secs(60),
            ))
            .with_endpoint(TokenBucketConfig::per_period(
                endpoint_capacity,
                Duration::from_secs(60),
            ))
    }

    #[test]
    fn test_burst_then_deny() {
        let (bucket, _clock) = bucket(5, 60);

        for expected_remaining in (0..5).rev() {
            let probe = bucket.try_consume_one();
            assert!(probe.allowed);
            assert_eq!(probe.remaining, expected_remaining);
            assert_eq!(probe.nanos_to_next_refill, 0);
        }

        let probe = bucket.try_consume_one();
        assert!(!probe.allowed);
        assert_eq!(probe.remaining, 0);
        assert_eq!(probe.nanos_to_next_refill, 60 * SECOND);
    }

    #[test]
    fn test_wait_is_exact_within_period() {
        let (bucket, clock) = bucket(5, 60);
        assert!(bucket.try_consume(5).allowed);

        clock.advance(Duration::from_millis(12_500));
        let probe = bucket.try_consume_one();
        assert!(!probe.allowed);
        assert_eq!(probe.nanos_to_next_refill, 47_500_000_000);
        assert_eq!(probe.retry_after_secs(), 47);
    }

    #[test]
    fn test_refill_happens_only_at_period_boundaries() {
        let (bucket, clock) = bucket(5, 60);
        assert!(bucket.try_consume(5).allowed);

        clock.advance(Duration::from_secs(59));
        assert_eq!(bucket.available_tokens(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(bucket.available_tokens(), 5);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let (bucket, clock) = bucket(5, 60);
        assert!(bucket.try_consume(2).allowed);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(bucket.available_tokens(), 5);
        assert_eq!(bucket.try_consume_one().remaining, 4);
    }

    #[test]
    fn test_partial_refill_schedule() {
        let clock = ManualClock::new();
        let config = TokenBucketConfig::per_period(10, Duration::from_secs(10)).with_refill_tokens(2);
        let bucket = TokenBucket::new(config, Arc::new(clock.clone()));
        assert!(bucket.try_consume(10).allowed);

        // Need 5 tokens at 2 per period: three periods
        let probe = bucket.try_consume(5);
        assert!(!probe.allowed);
        assert_eq!(probe.nanos_to_next_refill, 30 * SECOND);

        clock.advance(Duration::from_secs(25));
        assert_eq!(bucket.available_tokens(), 4);
        let probe = bucket.try_consume(5);
        assert!(!probe.allowed);
        assert_eq!(probe.nanos_to_next_refill, 5 * SECOND);
    }

    #[test]
    fn test_refill_keeps_period_phase() {
        let (bucket, clock) = bucket(5, 60);
        assert!(bucket.try_consume(5).allowed);

        clock.advance(Duration::from_secs(90));
        assert!(bucket.try_consume(5).allowed);

        // Next boundary is t=120, not t=150
        clock.advance(Duration::from_secs(29));
        assert_eq!(bucket.try_consume_one().nanos_to_next_refill, SECOND);
    }

    #[test]
    fn test_request_larger_than_capacity_never_succeeds() {
        let (bucket, _clock) = bucket(5, 60);
        let probe = bucket.try_consume(6);
        assert!(!probe.allowed);
        assert_eq!(probe.nanos_to_next_refill, u64::MAX);
        assert_eq!(probe.remaining, 5);
    }

    #[test]
    fn test_denied_attempt_does_not_consume() {
        let (bucket, _clock) = bucket(3, 60);
        assert!(bucket.try_consume(2).allowed);
        assert!(!bucket.try_consume(2).allowed);
        assert!(bucket.try_consume_one().allowed);
    }

    #[test]
    fn test_concurrent_consumers_never_overdraw() {
        let (bucket, _clock) = bucket(100, 60);
        let allowed = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        if bucket.try_consume_one().allowed {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.into_inner(), 100);
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn test_registry_concurrent_first_use_creates_one_bucket() {
        let clock = ManualClock::new();
        let registry = BucketRegistry::with_clock(&settings(50, 1_000), Arc::new(clock));
        let allowed = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    for _ in 0..10 {
                        if registry.try_consume(BucketScope::Tenant, "acme", 1).allowed {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.into_inner(), 50);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .get_or_create(BucketScope::Tenant, "acme")
                .available_tokens(),
            0
        );
    }

    #[test]
    fn test_registry_returns_same_bucket() {
        let registry = BucketRegistry::new(&settings(5, 10));
        let a = registry.get_or_create(BucketScope::Tenant, "acme");
        let b = registry.get_or_create(BucketScope::Tenant, "acme");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_scopes_are_independent() {
        let registry = BucketRegistry::new(&settings(5, 10));
        let tenant = registry.get_or_create(BucketScope::Tenant, "/api/v1/documents");
        let endpoint = registry.get_or_create(BucketScope::Endpoint, "/api/v1/documents");

        assert!(!Arc::ptr_eq(&tenant, &endpoint));
        assert_eq!(tenant.config().capacity, 5);
        assert_eq!(endpoint.config().capacity, 10);
    }

    #[test]
    fn test_registry_consume_shares_state_with_get_or_create() {
        let registry = BucketRegistry::new(&settings(5, 10));
        let probe = registry.try_consume(BucketScope::Tenant, "acme", 2);
        assert_eq!(probe.remaining, 3);

        let bucket = registry.get_or_create(BucketScope::Tenant, "acme");
        assert_eq!(bucket.available_tokens(), 3);
    }

    #[test]
    fn test_sweep_drops_only_idle_full_buckets() {
        let clock = ManualClock::new();
        let settings = settings(5, 10)
            .with_max_buckets(3)
            .with_bucket_idle(Duration::from_secs(600));
        let registry = BucketRegistry::with_clock(&settings, Arc::new(clock.clone()));

        registry.try_consume(BucketScope::Tenant, "idle-full", 1);
        registry.try_consume(BucketScope::Tenant, "idle-drained", 5);
        registry.try_consume(BucketScope::Tenant, "busy", 1);

        clock.advance(Duration::from_secs(600));
        registry.try_consume(BucketScope::Tenant, "busy", 1);

        // Both idle buckets have refilled to capacity; busy was just used
        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .get_or_create(BucketScope::Tenant, "busy")
                .available_tokens(),
            4
        );
    }

    #[test]
    fn test_sweep_keeps_idle_bucket_that_is_not_full() {
        let clock = ManualClock::new();
        let settings = RateLimitSettings::default()
            .with_tenant(
                TokenBucketConfig::per_period(5, Duration::from_secs(3_600)),
            )
            .with_bucket_idle(Duration::from_secs(600));
        let registry = BucketRegistry::with_clock(&settings, Arc::new(clock.clone()));

        registry.try_consume(BucketScope::Tenant, "acme", 5);
        clock.advance(Duration::from_secs(900));

        assert_eq!(registry.sweep(), 0);
        let probe = registry.try_consume(BucketScope::Tenant, "acme", 1);
        assert!(!probe.allowed, "sweep must not hand back a fresh bucket");
    }

    #[test]
    fn test_sweep_runs_when_registry_is_full() {
        let clock = ManualClock::new();
        let settings = settings(5, 10)
            .with_max_buckets(4)
            .with_bucket_idle(Duration::from_secs(60));
        let registry = BucketRegistry::with_clock(&settings, Arc::new(clock.clone()));

        for i in 0..4 {
            registry.get_or_create(BucketScope::Tenant, &format!("tenant-{}", i));
        }
        assert_eq!(registry.len(), 4);

        clock.advance(Duration::from_secs(61));
        registry.get_or_create(BucketScope::Tenant, "newcomer");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_automatic_sweeps_are_rate_limited() {
        let clock = ManualClock::new();
        let settings = settings(5, 10)
            .with_max_buckets(2)
            .with_bucket_idle(Duration::from_secs(600));
        let registry = BucketRegistry::with_clock(&settings, Arc::new(clock.clone()));

        registry.get_or_create(BucketScope::Tenant, "a");
        registry.get_or_create(BucketScope::Tenant, "b");

        // Full registry, nothing idle yet: this sweep finds nothing
        clock.advance(Duration::from_secs(599));
        registry.get_or_create(BucketScope::Tenant, "c");
        assert_eq!(registry.len(), 3);

        // a and b are now sweepable, but the last sweep was 1s ago
        clock.advance(Duration::from_secs(1));
        registry.get_or_create(BucketScope::Tenant, "d");
        assert_eq!(registry.len(), 4);

        // One tenth of bucket_idle after the previous sweep
        clock.advance(Duration::from_secs(59));
        registry.get_or_create(BucketScope::Tenant, "e");
        assert_eq!(registry.len(), 3);
    }
}
