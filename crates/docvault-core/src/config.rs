//! Startup configuration for the admission gate and the cache.
//!
//! Built once when the process starts and passed by value into each
//! component constructor. Nothing re-reads the environment afterwards.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DOCVAULT_TENANT_RATE_CAPACITY` | 100 | Tenant bucket burst size |
//! | `DOCVAULT_TENANT_RATE_REFILL_TOKENS` | 100 | Tokens restored per tenant period |
//! | `DOCVAULT_TENANT_RATE_REFILL_SECS` | 60 | Tenant refill period |
//! | `DOCVAULT_ENDPOINT_RATE_CAPACITY` | 1000 | Endpoint bucket burst size |
//! | `DOCVAULT_ENDPOINT_RATE_REFILL_TOKENS` | 1000 | Tokens restored per endpoint period |
//! | `DOCVAULT_ENDPOINT_RATE_REFILL_SECS` | 60 | Endpoint refill period |
//! | `DOCVAULT_RATE_LIMIT_MAX_BUCKETS` | 10000 | Bucket count that triggers an idle sweep |
//! | `DOCVAULT_RATE_LIMIT_BUCKET_IDLE_SECS` | 600 | Idle time before a full bucket may be dropped |
//! | `DOCVAULT_TENANT_HEADER` | `X-Tenant-ID` | Header carrying the tenant |
//! | `DOCVAULT_CACHE_BACKEND` | `memory` | `memory` or `redis` |
//! | `DOCVAULT_REDIS_URL` | `redis://127.0.0.1:6379` | Distributed store address |
//! | `DOCVAULT_CACHE_OP_TIMEOUT_MS` | 250 | Upper bound for one store call |
//! | `DOCVAULT_CACHE_LOCAL_CAPACITY` | 10000 | Local fast-path entries (0 disables) |
//! | `DOCVAULT_CACHE_LOCAL_TTL_SECS` | 60 | Cap on local fast-path entry age |
//! | `DOCVAULT_CACHE_KEY_PREFIX` | `docvault` | Prefix for store keys |
//! | `PORT` | 8080 | Listen port |

use crate::namespace::TierConfig;
use crate::{Result, VaultError};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TENANT_CAPACITY: u64 = 100;
pub const DEFAULT_TENANT_REFILL_SECS: u64 = 60;
pub const DEFAULT_ENDPOINT_CAPACITY: u64 = 1_000;
pub const DEFAULT_ENDPOINT_REFILL_SECS: u64 = 60;
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;
pub const DEFAULT_BUCKET_IDLE_SECS: u64 = 600;
pub const DEFAULT_TENANT_HEADER: &str = "X-Tenant-ID";

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_LOCAL_CAPACITY: usize = 10_000;
pub const DEFAULT_LOCAL_TTL_SECS: u64 = 60;
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "docvault";
pub const DEFAULT_PORT: u16 = 8080;

/// Capacity and refill schedule of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: u64,
    /// Tokens restored at every period boundary.
    pub refill_tokens: u64,
    /// Length of one refill period.
    pub refill_period: Duration,
}

impl TokenBucketConfig {
    /// A bucket that refills to `capacity` once per `period`.
    pub fn per_period(capacity: u64, period: Duration) -> Self {
        Self {
            capacity,
            refill_tokens: capacity,
            refill_period: period,
        }
    }

    pub fn with_refill_tokens(mut self, refill_tokens: u64) -> Self {
        self.refill_tokens = refill_tokens;
        self
    }

    /// Validate bucket parameters, naming the offending scope in errors.
    pub fn validate(&self, scope: &str) -> Result<()> {
        if self.capacity == 0 {
            return Err(VaultError::InvalidConfig(format!(
                "{} capacity must be > 0",
                scope
            )));
        }
        if self.refill_tokens == 0 {
            return Err(VaultError::InvalidConfig(format!(
                "{} refill_tokens must be > 0",
                scope
            )));
        }
        if self.refill_period.is_zero() {
            return Err(VaultError::InvalidConfig(format!(
                "{} refill_period must be > 0",
                scope
            )));
        }
        Ok(())
    }

    fn from_env(prefix: &str, default_capacity: u64, default_refill_secs: u64) -> Self {
        let capacity = env_parse(&format!("{}_CAPACITY", prefix), default_capacity);
        Self {
            capacity,
            refill_tokens: env_parse(&format!("{}_REFILL_TOKENS", prefix), capacity),
            refill_period: Duration::from_secs(env_parse(
                &format!("{}_REFILL_SECS", prefix),
                default_refill_secs,
            )),
        }
    }
}

/// Rate limiting configuration for both bucket scopes.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Budget shared by all requests of one tenant.
    pub tenant: TokenBucketConfig,
    /// Budget shared by all tenants hitting one endpoint.
    pub endpoint: TokenBucketConfig,
    /// Bucket count above which idle, full buckets are swept.
    pub max_buckets: usize,
    /// How long a bucket must go unused before the sweep may drop it.
    pub bucket_idle: Duration,
    /// Header carrying an explicit tenant identifier.
    pub tenant_header: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            tenant: TokenBucketConfig::per_period(
                DEFAULT_TENANT_CAPACITY,
                Duration::from_secs(DEFAULT_TENANT_REFILL_SECS),
            ),
            endpoint: TokenBucketConfig::per_period(
                DEFAULT_ENDPOINT_CAPACITY,
                Duration::from_secs(DEFAULT_ENDPOINT_REFILL_SECS),
            ),
            max_buckets: DEFAULT_MAX_BUCKETS,
            bucket_idle: Duration::from_secs(DEFAULT_BUCKET_IDLE_SECS),
            tenant_header: DEFAULT_TENANT_HEADER.to_string(),
        }
    }
}

impl RateLimitSettings {
    pub fn from_env() -> Self {
        Self {
            tenant: TokenBucketConfig::from_env(
                "DOCVAULT_TENANT_RATE",
                DEFAULT_TENANT_CAPACITY,
                DEFAULT_TENANT_REFILL_SECS,
            ),
            endpoint: TokenBucketConfig::from_env(
                "DOCVAULT_ENDPOINT_RATE",
                DEFAULT_ENDPOINT_CAPACITY,
                DEFAULT_ENDPOINT_REFILL_SECS,
            ),
            max_buckets: env_parse("DOCVAULT_RATE_LIMIT_MAX_BUCKETS", DEFAULT_MAX_BUCKETS),
            bucket_idle: Duration::from_secs(env_parse(
                "DOCVAULT_RATE_LIMIT_BUCKET_IDLE_SECS",
                DEFAULT_BUCKET_IDLE_SECS,
            )),
            tenant_header: env_parse("DOCVAULT_TENANT_HEADER", DEFAULT_TENANT_HEADER.to_string()),
        }
    }

    pub fn with_tenant(mut self, config: TokenBucketConfig) -> Self {
        self.tenant = config;
        self
    }

    pub fn with_endpoint(mut self, config: TokenBucketConfig) -> Self {
        self.endpoint = config;
        self
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn with_bucket_idle(mut self, idle: Duration) -> Self {
        self.bucket_idle = idle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.tenant.validate("tenant rate limit")?;
        self.endpoint.validate("endpoint rate limit")?;
        if self.max_buckets == 0 {
            return Err(VaultError::InvalidConfig(
                "max_buckets must be > 0".to_string(),
            ));
        }
        if self.tenant_header.trim().is_empty() {
            return Err(VaultError::InvalidConfig(
                "tenant_header cannot be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which store backs the cache facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Single-tier, in-process store.
    Memory,
    /// Networked Redis store.
    Redis { url: String },
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" | "local" => Ok(CacheBackendKind::Memory),
            "redis" => Ok(CacheBackendKind::Redis {
                url: DEFAULT_REDIS_URL.to_string(),
            }),
            other => Err(format!("Unknown cache backend: {}", other)),
        }
    }
}

/// Cache facade configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    /// Upper bound on a single store round trip.
    pub op_timeout: Duration,
    /// Entries held by the local fast-path; 0 disables it.
    pub local_capacity: usize,
    /// Cap on how long the local fast-path serves an entry.
    pub local_ttl: Duration,
    /// Prefix applied to every store key.
    pub key_prefix: String,
    pub tiers: TierConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            op_timeout: Duration::from_millis(DEFAULT_CACHE_OP_TIMEOUT_MS),
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            local_ttl: Duration::from_secs(DEFAULT_LOCAL_TTL_SECS),
            key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            tiers: TierConfig::default(),
        }
    }
}

impl CacheSettings {
    /// Create configuration from environment variables.
    ///
    /// An unrecognised `DOCVAULT_CACHE_BACKEND` is an error rather than a
    /// silent fallback, since it usually means a deployment typo.
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("DOCVAULT_CACHE_BACKEND") {
            Ok(raw) => raw.parse::<CacheBackendKind>().map_err(VaultError::InvalidConfig)?,
            Err(_) => CacheBackendKind::Memory,
        };
        let backend = match backend {
            CacheBackendKind::Redis { .. } => CacheBackendKind::Redis {
                url: env_parse("DOCVAULT_REDIS_URL", DEFAULT_REDIS_URL.to_string()),
            },
            other => other,
        };

        Ok(Self {
            backend,
            op_timeout: Duration::from_millis(env_parse(
                "DOCVAULT_CACHE_OP_TIMEOUT_MS",
                DEFAULT_CACHE_OP_TIMEOUT_MS,
            )),
            local_capacity: env_parse("DOCVAULT_CACHE_LOCAL_CAPACITY", DEFAULT_LOCAL_CAPACITY),
            local_ttl: Duration::from_secs(env_parse(
                "DOCVAULT_CACHE_LOCAL_TTL_SECS",
                DEFAULT_LOCAL_TTL_SECS,
            )),
            key_prefix: env_parse(
                "DOCVAULT_CACHE_KEY_PREFIX",
                DEFAULT_CACHE_KEY_PREFIX.to_string(),
            ),
            tiers: TierConfig::from_env(),
        })
    }

    pub fn with_backend(mut self, backend: CacheBackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_tiers(mut self, tiers: TierConfig) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local_capacity = capacity;
        self
    }

    /// Disable the local fast-path.
    pub fn without_local_tier(mut self) -> Self {
        self.local_capacity = 0;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()?;
        if self.op_timeout.is_zero() {
            return Err(VaultError::InvalidConfig(
                "cache op_timeout must be > 0".to_string(),
            ));
        }
        if self.local_capacity > 0 && self.local_ttl.is_zero() {
            return Err(VaultError::InvalidConfig(
                "cache local_ttl must be > 0 when the local tier is enabled".to_string(),
            ));
        }
        if let CacheBackendKind::Redis { url } = &self.backend {
            if url.trim().is_empty() {
                return Err(VaultError::InvalidConfig(
                    "redis url cannot be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Everything the gateway needs at startup.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub rate_limits: RateLimitSettings,
    pub cache: CacheSettings,
    pub port: Option<u16>,
}

impl GatewayConfig {
    /// Load and validate. An invalid configuration must stop the process
    /// before it serves traffic.
    pub fn load() -> Result<Self> {
        let config = Self {
            rate_limits: RateLimitSettings::from_env(),
            cache: CacheSettings::from_env()?,
            port: Some(env_parse("PORT", DEFAULT_PORT)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limits.validate()?;
        self.cache.validate()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// Parse an environment variable with a default fallback.
///
/// Unparseable values fall back to the default with a warning.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            default
        }),
        Err(_) => default,
    }
}
