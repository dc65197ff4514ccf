//! HTTP-level tests for the admission gate
//!
//! Drives axum routers through `tower::ServiceExt::oneshot` with a manual
//! clock, so refill behaviour is checked without sleeping.

use axum::{
    body::Body,
    extract::Extension,
    http::{Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use docvault_api::routes::{router, AppState};
use docvault_api::{admission_middleware, AdmissionGate, BucketRegistry, ResolvedTenant, TenantResolver};
use docvault_cache::{CacheFacade, MemoryStore};
use docvault_core::{CacheSettings, ManualClock, RateLimitSettings, TokenBucketConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Helper to extract JSON body from response
async fn extract_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to parse JSON")
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn limits(tenant_capacity: u64, endpoint_capacity: u64) -> RateLimitSettings {
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

fn gate(settings: &RateLimitSettings, clock: &ManualClock) -> Arc<AdmissionGate> {
    let registry = Arc::new(BucketRegistry::with_clock(settings, Arc::new(clock.clone())));
    Arc::new(AdmissionGate::new(registry, TenantResolver::default()))
}

/// Stand-in for a business controller behind the gate
async fn echo_tenant(Extension(tenant): Extension<ResolvedTenant>) -> Json<Value> {
    Json(json!({
        "tenant": tenant.tenant_id().as_str(),
        "source": tenant.source().as_str(),
    }))
}

fn documents_app(gate: Arc<AdmissionGate>) -> Router {
    Router::new()
        .route("/api/v1/documents", get(echo_tenant))
        .route("/api/v1/tenant/{tenant}/documents", get(echo_tenant))
        .layer(middleware::from_fn_with_state(gate, admission_middleware))
}

fn request(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn request_for_tenant(path: &str, tenant: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("X-Tenant-ID", tenant)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_burst_of_five_then_rejection() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(5, 1000), &clock));

    for i in 0..5u64 {
        let response = app
            .clone()
            .oneshot(request_for_tenant("/api/v1/documents", "acme"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_u64(&response, "X-Rate-Limit-Tenant-Remaining"),
            Some(4 - i)
        );
        assert_eq!(
            header_u64(&response, "X-Rate-Limit-API-Remaining"),
            Some(999 - i)
        );
    }

    clock.advance(Duration::from_secs(2));
    let response = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "acme"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_u64(&response, "Retry-After-Seconds"), Some(58));
    assert!(response.headers().get("X-Rate-Limit-Tenant-Remaining").is_none());

    let body = extract_json_body(response).await;
    assert_eq!(body["error"], "Rate limit exceeded for tenant");
    assert_eq!(body["retryAfter"], 58);
}

#[tokio::test]
async fn test_tenant_budget_restored_after_period() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(1, 1000), &clock));

    let first = app.clone().oneshot(request("/api/v1/documents")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(request("/api/v1/documents")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(60));
    let third = app.clone().oneshot(request("/api/v1/documents")).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tenants_have_independent_budgets() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(1, 1000), &clock));

    let acme = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "acme"))
        .await
        .unwrap();
    let globex = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "globex"))
        .await
        .unwrap();
    assert_eq!(acme.status(), StatusCode::OK);
    assert_eq!(globex.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_endpoint_rejection_after_tenant_passes() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(100, 2), &clock));

    for tenant in ["acme", "globex"] {
        let response = app
            .clone()
            .oneshot(request_for_tenant("/api/v1/documents", tenant))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "initech"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_u64(&response, "Retry-After-Seconds"), Some(60));
    let body = extract_json_body(response).await;
    assert_eq!(body["error"], "API rate limit exceeded");
    assert_eq!(body["retryAfter"], 60);
}

#[tokio::test]
async fn test_tenant_rejection_does_not_spend_endpoint_budget() {
    let clock = ManualClock::new();
    let settings = limits(1, 2);
    let gate = gate(&settings, &clock);
    let app = documents_app(Arc::clone(&gate));

    // acme spends its single token, then is rejected three times
    for _ in 0..4 {
        app.clone()
            .oneshot(request_for_tenant("/api/v1/documents", "acme"))
            .await
            .unwrap();
    }

    // Endpoint still has one token left for someone else
    let response = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "globex"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_u64(&response, "X-Rate-Limit-API-Remaining"), Some(0));
}

#[tokio::test]
async fn test_tenant_resolved_from_path() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(5, 1000), &clock));

    let response = app
        .oneshot(request("/api/v1/tenant/acme/documents"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["tenant"], "acme");
    assert_eq!(body["source"], "path");
}

#[tokio::test]
async fn test_tenant_falls_back_to_default() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(5, 1000), &clock));

    let response = app.oneshot(request("/api/v1/documents")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["tenant"], "default");
    assert_eq!(body["source"], "fallback");
}

#[tokio::test]
async fn test_path_tenant_and_header_tenant_share_budget() {
    let clock = ManualClock::new();
    let app = documents_app(gate(&limits(1, 1000), &clock));

    let by_path = app
        .clone()
        .oneshot(request("/api/v1/tenant/acme/documents"))
        .await
        .unwrap();
    assert_eq!(by_path.status(), StatusCode::OK);

    let by_header = app
        .clone()
        .oneshot(request_for_tenant("/api/v1/documents", "acme"))
        .await
        .unwrap();
    assert_eq!(by_header.status(), StatusCode::TOO_MANY_REQUESTS);
}

fn gateway(settings: &RateLimitSettings, clock: &ManualClock) -> Router {
    let cache = CacheFacade::new(Arc::new(MemoryStore::new()), &CacheSettings::default());
    router(AppState {
        gate: gate(settings, clock),
        cache: Arc::new(cache),
    })
}

#[tokio::test]
async fn test_health_bypasses_gate() {
    let clock = ManualClock::new();
    let app = gateway(&limits(1, 1), &clock);

    for _ in 0..3 {
        let response = app.clone().oneshot(request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("X-Rate-Limit-Tenant-Remaining").is_none());
    }
}

#[tokio::test]
async fn test_cache_tiers_endpoint() {
    let clock = ManualClock::new();
    let app = gateway(&limits(10, 10), &clock);

    let response = app
        .oneshot(request_for_tenant("/api/v1/cache/tiers", "acme"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_u64(&response, "X-Rate-Limit-Tenant-Remaining"),
        Some(9)
    );

    let body = extract_json_body(response).await;
    assert_eq!(body["tenant"], "acme");
    assert_eq!(body["backend"], "memory");

    let tiers = body["tiers"].as_array().unwrap();
    assert_eq!(tiers.len(), 6);
    let search = tiers
        .iter()
        .find(|t| t["namespace"] == "searchResults")
        .unwrap();
    assert_eq!(search["ttl"], 300);
    assert_eq!(search["cacheNullValues"], false);
}

#[tokio::test]
async fn test_unknown_route_is_not_charged() {
    let clock = ManualClock::new();
    let app = gateway(&limits(1, 10), &clock);

    let missing = app.clone().oneshot(request("/nope")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(request("/api/v1/cache/tiers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
