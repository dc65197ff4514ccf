//! DocVault API Library
//!
//! Request admission for the DocVault gateway: token buckets, the bucket
//! registry, tenant resolution, and the axum middleware that ties them
//! together ahead of every business handler.

pub mod admission;
pub mod rate_limiting;
pub mod routes;
pub mod tenant_resolver;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use admission::{admission_middleware, AdmissionDecision, AdmissionGate, DenialScope};
pub use rate_limiting::{BucketKey, BucketRegistry, BucketScope, ConsumptionProbe, TokenBucket};
pub use tenant_resolver::{ResolvedTenant, TenantResolver, TenantSource};
