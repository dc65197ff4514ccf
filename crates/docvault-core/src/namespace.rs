//! Cache namespaces and their TTL tiers.
//!
//! Every cached data class lives in exactly one namespace, and each
//! namespace carries one TTL that applies uniformly to all of its entries.
//! The table is built once at startup and never mutated afterwards.

use crate::config::env_parse;
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DOCUMENTS_TTL_SECS: u64 = 3_600;
pub const DEFAULT_SEARCH_RESULTS_TTL_SECS: u64 = 300;
pub const DEFAULT_DOCUMENT_METADATA_TTL_SECS: u64 = 1_800;
pub const DEFAULT_USER_PREFERENCES_TTL_SECS: u64 = 86_400;
pub const DEFAULT_TENANT_CONFIG_TTL_SECS: u64 = 43_200;
pub const DEFAULT_FILE_CONTENT_TTL_SECS: u64 = 7_200;

/// Logical partition of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheNamespace {
    Documents,
    SearchResults,
    DocumentMetadata,
    UserPreferences,
    TenantConfig,
    FileContent,
}

impl CacheNamespace {
    /// All namespaces, in table order.
    pub const ALL: [CacheNamespace; 6] = [
        CacheNamespace::Documents,
        CacheNamespace::SearchResults,
        CacheNamespace::DocumentMetadata,
        CacheNamespace::UserPreferences,
        CacheNamespace::TenantConfig,
        CacheNamespace::FileContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::SearchResults => "searchResults",
            Self::DocumentMetadata => "documentMetadata",
            Self::UserPreferences => "userPreferences",
            Self::TenantConfig => "tenantConfig",
            Self::FileContent => "fileContent",
        }
    }

    /// Environment variable carrying this namespace's TTL in seconds.
    pub fn ttl_env_var(&self) -> &'static str {
        match self {
            Self::Documents => "DOCVAULT_CACHE_TTL_DOCUMENTS_SECS",
            Self::SearchResults => "DOCVAULT_CACHE_TTL_SEARCH_RESULTS_SECS",
            Self::DocumentMetadata => "DOCVAULT_CACHE_TTL_DOCUMENT_METADATA_SECS",
            Self::UserPreferences => "DOCVAULT_CACHE_TTL_USER_PREFERENCES_SECS",
            Self::TenantConfig => "DOCVAULT_CACHE_TTL_TENANT_CONFIG_SECS",
            Self::FileContent => "DOCVAULT_CACHE_TTL_FILE_CONTENT_SECS",
        }
    }

    fn default_ttl_secs(&self) -> u64 {
        match self {
            Self::Documents => DEFAULT_DOCUMENTS_TTL_SECS,
            Self::SearchResults => DEFAULT_SEARCH_RESULTS_TTL_SECS,
            Self::DocumentMetadata => DEFAULT_DOCUMENT_METADATA_TTL_SECS,
            Self::UserPreferences => DEFAULT_USER_PREFERENCES_TTL_SECS,
            Self::TenantConfig => DEFAULT_TENANT_CONFIG_TTL_SECS,
            Self::FileContent => DEFAULT_FILE_CONTENT_TTL_SECS,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheNamespace {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CacheNamespace::ALL
            .into_iter()
            .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown cache namespace: {}", s))
    }
}

/// Caching policy for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicy {
    /// Lifetime of every entry in the namespace.
    #[serde(serialize_with = "serialize_secs")]
    pub ttl: Duration,
    /// Whether null values may be stored. Always false: a miss is absence.
    pub cache_null_values: bool,
}

fn serialize_secs<S: serde::Serializer>(
    ttl: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(ttl.as_secs())
}

impl TierPolicy {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            cache_null_values: false,
        }
    }
}

/// Per-namespace TTL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    policies: [TierPolicy; 6],
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            policies: CacheNamespace::ALL
                .map(|ns| TierPolicy::with_ttl(Duration::from_secs(ns.default_ttl_secs()))),
        }
    }
}

impl TierConfig {
    /// Build the table from `DOCVAULT_CACHE_TTL_*_SECS` variables.
    ///
    /// Falls back to defaults for any unset variables.
    pub fn from_env() -> Self {
        Self {
            policies: CacheNamespace::ALL.map(|ns| {
                TierPolicy::with_ttl(Duration::from_secs(env_parse(
                    ns.ttl_env_var(),
                    ns.default_ttl_secs(),
                )))
            }),
        }
    }

    /// Override one namespace's TTL.
    pub fn with_ttl(mut self, namespace: CacheNamespace, ttl: Duration) -> Self {
        self.policies[namespace.index()] = TierPolicy::with_ttl(ttl);
        self
    }

    pub fn policy(&self, namespace: CacheNamespace) -> &TierPolicy {
        &self.policies[namespace.index()]
    }

    pub fn ttl(&self, namespace: CacheNamespace) -> Duration {
        self.policy(namespace).ttl
    }

    pub fn iter(&self) -> impl Iterator<Item = (CacheNamespace, &TierPolicy)> {
        CacheNamespace::ALL.into_iter().zip(self.policies.iter())
    }

    /// Reject zero TTLs and null caching.
    pub fn validate(&self) -> Result<()> {
        for (ns, policy) in self.iter() {
            if policy.ttl.is_zero() {
                return Err(VaultError::InvalidConfig(format!(
                    "cache ttl for namespace '{}' must be > 0",
                    ns
                )));
            }
            if policy.cache_null_values {
                return Err(VaultError::InvalidConfig(format!(
                    "namespace '{}' must not cache null values",
                    ns
                )));
            }
        }
        Ok(())
    }
}
