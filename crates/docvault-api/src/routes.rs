//! Gateway routes
//!
//! Only operational endpoints live here; business controllers mount behind
//! the same admission layer in the services that embed this crate.

use crate::admission::{admission_middleware, AdmissionGate};
use crate::tenant_resolver::ResolvedTenant;
use axum::{
    extract::{Extension, State},
    middleware,
    routing::get,
    Json, Router,
};
use docvault_cache::{CacheFacade, CacheStats};
use docvault_core::{CacheNamespace, TierPolicy};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub cache: Arc<CacheFacade>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TierResponse {
    namespace: CacheNamespace,
    #[serde(flatten)]
    policy: TierPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheTiersResponse {
    tenant: String,
    backend: &'static str,
    tiers: Vec<TierResponse>,
    stats: CacheStats,
}

/// Build the gateway router.
///
/// `/health` bypasses the admission gate so probes never consume tenant
/// budget. Unmatched paths are not charged either.
pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/api/v1/cache/tiers", get(cache_tiers))
        .route("/api/v1/tenant/{tenant}/cache/tiers", get(cache_tiers));

    #[cfg(feature = "metrics")]
    let gated = gated.route("/metrics", get(metrics_handler));

    gated
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.gate),
            admission_middleware,
        ))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Namespace TTL table and cache counters
async fn cache_tiers(
    State(state): State<AppState>,
    Extension(tenant): Extension<ResolvedTenant>,
) -> Json<CacheTiersResponse> {
    let tiers = state
        .cache
        .tiers()
        .iter()
        .map(|(namespace, policy)| TierResponse {
            namespace,
            policy: *policy,
        })
        .collect();

    Json(CacheTiersResponse {
        tenant: tenant.tenant_id().to_string(),
        backend: state.cache.backend_name(),
        tiers,
        stats: state.cache.stats(),
    })
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    crate::metrics::update_cache_stats(&state.cache.stats());
    crate::metrics::render()
}
