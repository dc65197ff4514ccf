//! DocVault Core
//!
//! Core types shared by the admission gate and the tiered cache:
//! tenant identity, cache namespaces and their TTL tiers, clocks, and the
//! startup configuration surface.

pub mod clock;
pub mod config;
pub mod namespace;

pub use clock::{Clock, ManualClock, MonotonicClock, WallClock};
pub use config::{
    CacheBackendKind, CacheSettings, GatewayConfig, RateLimitSettings, TokenBucketConfig,
};
pub use namespace::{CacheNamespace, TierConfig, TierPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier used when a request carries no tenant information.
pub const DEFAULT_TENANT: &str = "default";

/// Errors raised by core configuration and identity handling
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid tenant identifier: {0}")]
    InvalidTenant(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Opaque tenant identifier.
///
/// Scopes every rate-limit bucket and cache entry belonging to one tenant.
/// The only constraint is that it is not blank; surrounding whitespace is
/// trimmed on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant identifier, rejecting blank input.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(VaultError::InvalidTenant(
                "tenant identifier cannot be blank".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The fallback tenant, `"default"`.
    pub fn fallback() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the fallback tenant.
    pub fn is_fallback(&self) -> bool {
        self.0 == DEFAULT_TENANT
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
