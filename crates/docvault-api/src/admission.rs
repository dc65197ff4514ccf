//! Admission gate middleware
//!
//! Runs once per request, before any handler:
//!
//! 1. Resolve the tenant (see [`crate::tenant_resolver`]).
//! 2. Charge one token to the tenant bucket. On denial respond 429 and stop;
//!    the endpoint bucket is not touched.
//! 3. Charge one token to the endpoint bucket, keyed by URI path. On denial
//!    respond 429.
//! 4. Forward the request and add the remaining-token headers to the
//!    response.
//!
//! A 429 carries `Retry-After-Seconds` and a JSON body
//! `{"error": ..., "retryAfter": <seconds>}`. Denials are ordinary control
//! flow and are logged at `warn`, never as errors.
//!
//! ```rust,ignore
//! let gate = Arc::new(AdmissionGate::from_settings(&config.rate_limits)?);
//! let app = Router::new()
//!     .route("/api/v1/documents", get(list_documents))
//!     .layer(middleware::from_fn_with_state(gate, admission_middleware));
//! ```

use crate::rate_limiting::{BucketRegistry, BucketScope};
use crate::tenant_resolver::{ResolvedTenant, TenantResolver};
use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue},
        HeaderMap, StatusCode, Uri,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use docvault_core::{RateLimitSettings, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RETRY_AFTER_SECONDS_HEADER: &str = "retry-after-seconds";
pub const TENANT_REMAINING_HEADER: &str = "x-rate-limit-tenant-remaining";
pub const API_REMAINING_HEADER: &str = "x-rate-limit-api-remaining";

/// Which bucket rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialScope {
    Tenant,
    Endpoint,
}

impl DenialScope {
    /// Client-facing error message.
    pub fn message(&self) -> &'static str {
        match self {
            DenialScope::Tenant => "Rate limit exceeded for tenant",
            DenialScope::Endpoint => "API rate limit exceeded",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DenialScope::Tenant => "tenant",
            DenialScope::Endpoint => "endpoint",
        }
    }
}

/// Result of running the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted {
        tenant: ResolvedTenant,
        tenant_remaining: u64,
        endpoint_remaining: u64,
    },
    Denied {
        tenant: ResolvedTenant,
        scope: DenialScope,
        retry_after_secs: u64,
    },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted { .. })
    }

    pub fn tenant(&self) -> &ResolvedTenant {
        match self {
            AdmissionDecision::Admitted { tenant, .. } | AdmissionDecision::Denied { tenant, .. } => {
                tenant
            }
        }
    }
}

/// 429 response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitErrorResponse {
    error: &'static str,
    retry_after: u64,
}

/// Tenant resolution plus the two-scope bucket check.
#[derive(Debug)]
pub struct AdmissionGate {
    registry: Arc<BucketRegistry>,
    resolver: TenantResolver,
}

impl AdmissionGate {
    pub fn new(registry: Arc<BucketRegistry>, resolver: TenantResolver) -> Self {
        Self { registry, resolver }
    }

    /// Build a gate with a fresh registry from validated settings.
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self> {
        let resolver = TenantResolver::new(&settings.tenant_header)?;
        Ok(Self::new(Arc::new(BucketRegistry::new(settings)), resolver))
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Resolve the tenant and charge both buckets.
    pub fn admit(&self, headers: &HeaderMap, uri: &Uri) -> AdmissionDecision {
        let tenant = self.resolver.resolve(headers, uri);

        let tenant_probe =
            self.registry
                .try_consume(BucketScope::Tenant, tenant.tenant_id().as_str(), 1);
        if !tenant_probe.allowed {
            return AdmissionDecision::Denied {
                tenant,
                scope: DenialScope::Tenant,
                retry_after_secs: tenant_probe.retry_after_secs(),
            };
        }

        let endpoint_probe = self
            .registry
            .try_consume(BucketScope::Endpoint, uri.path(), 1);
        if !endpoint_probe.allowed {
            return AdmissionDecision::Denied {
                tenant,
                scope: DenialScope::Endpoint,
                retry_after_secs: endpoint_probe.retry_after_secs(),
            };
        }

        AdmissionDecision::Admitted {
            tenant,
            tenant_remaining: tenant_probe.remaining,
            endpoint_remaining: endpoint_probe.remaining,
        }
    }
}

/// Admission middleware
pub async fn admission_middleware(
    State(gate): State<Arc<AdmissionGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    let decision = gate.admit(req.headers(), req.uri());

    #[cfg(feature = "metrics")]
    crate::metrics::record_admission(&decision, gate.registry().len());

    match decision {
        AdmissionDecision::Admitted {
            tenant,
            tenant_remaining,
            endpoint_remaining,
        } => {
            debug!(
                tenant_id = %tenant.tenant_id(),
                source = tenant.source().as_str(),
                path = %req.uri().path(),
                tenant_remaining,
                endpoint_remaining,
                "Request admitted"
            );
            req.extensions_mut().insert(tenant);

            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static(TENANT_REMAINING_HEADER),
                HeaderValue::from(tenant_remaining),
            );
            headers.insert(
                HeaderName::from_static(API_REMAINING_HEADER),
                HeaderValue::from(endpoint_remaining),
            );
            response
        }
        AdmissionDecision::Denied {
            tenant,
            scope,
            retry_after_secs,
        } => {
            warn!(
                tenant_id = %tenant.tenant_id(),
                scope = scope.as_str(),
                path = %req.uri().path(),
                retry_after_secs,
                "Request rejected by rate limit"
            );
            too_many_requests(scope, retry_after_secs)
        }
    }
}

fn too_many_requests(scope: DenialScope, retry_after_secs: u64) -> Response {
    let body = RateLimitErrorResponse {
        error: scope.message(),
        retry_after: retry_after_secs,
    };
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(
            HeaderName::from_static(RETRY_AFTER_SECONDS_HEADER),
            HeaderValue::from(retry_after_secs),
        )],
        Json(body),
    )
        .into_response()
}
