//! Tenant Resolution
//!
//! Determines which tenant a request is charged to.
//!
//! # Resolution Chain
//!
//! 1. **Header**: the tenant header (`X-Tenant-ID` unless configured
//!    otherwise), trimmed, if non-blank.
//! 2. **Path**: the segment immediately following a literal `tenant`
//!    segment, e.g. `/api/v1/tenant/acme/documents` resolves to `acme`.
//! 3. **Fallback**: the literal tenant `default`.
//!
//! Resolution never fails. The resolved tenant is attached to request
//! extensions by the admission gate so handlers see the identity that was
//! charged.
//!
//! ```rust,ignore
//! async fn list_documents(
//!     Extension(tenant): Extension<ResolvedTenant>,
//! ) -> impl IntoResponse {
//!     // tenant.tenant_id() is the tenant the request was charged to
//! }
//! ```

use axum::http::{HeaderMap, HeaderName, Uri};
use docvault_core::{Result, TenantId, VaultError};
use tracing::debug;

/// Header name for explicit tenant ID
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Path segment that introduces a tenant identifier
const TENANT_PATH_SEGMENT: &str = "tenant";

/// How the tenant was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    /// Resolved from the tenant header
    Header,
    /// Resolved from a `/tenant/{id}` path segment
    Path,
    /// Nothing identified a tenant
    Fallback,
}

impl TenantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantSource::Header => "header",
            TenantSource::Path => "path",
            TenantSource::Fallback => "fallback",
        }
    }
}

/// Resolved tenant information attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    tenant_id: TenantId,
    source: TenantSource,
}

impl ResolvedTenant {
    pub fn new(tenant_id: TenantId, source: TenantSource) -> Self {
        Self { tenant_id, source }
    }

    pub fn fallback() -> Self {
        Self::new(TenantId::fallback(), TenantSource::Fallback)
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn source(&self) -> TenantSource {
        self.source
    }
}

/// Resolves tenants using a configured header name.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header: HeaderName,
}

impl Default for TenantResolver {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static("x-tenant-id"),
        }
    }
}

impl TenantResolver {
    /// Create a resolver reading `header`. Fails on names that are not
    /// valid HTTP header names.
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.trim().as_bytes()).map_err(|e| {
            VaultError::InvalidConfig(format!("Invalid tenant header '{}': {}", header, e))
        })?;
        Ok(Self { header })
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    /// Resolve the tenant for a request.
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> ResolvedTenant {
        if let Some(tenant_id) = self.extract_tenant_header(headers) {
            debug!(tenant_id = %tenant_id, "Resolved tenant from header");
            return ResolvedTenant::new(tenant_id, TenantSource::Header);
        }

        if let Some(tenant_id) = extract_tenant_path_segment(uri.path()) {
            debug!(tenant_id = %tenant_id, "Resolved tenant from path");
            return ResolvedTenant::new(tenant_id, TenantSource::Path);
        }

        ResolvedTenant::fallback()
    }

    fn extract_tenant_header(&self, headers: &HeaderMap) -> Option<TenantId> {
        headers
            .get(&self.header)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| TenantId::new(s).ok())
    }
}

/// Extract the segment after the first literal `tenant` segment.
fn extract_tenant_path_segment(path: &str) -> Option<TenantId> {
    let mut segments = path.split('/');
    segments.find(|segment| *segment == TENANT_PATH_SEGMENT)?;
    segments.next().and_then(|s| TenantId::new(s).ok())
}
