//! Prometheus metrics for the DocVault gateway
//!
//! This module is only compiled when the `metrics` feature is enabled.
//!
//! - `docvault_admission_decisions_total{scope,outcome}` - Counter of gate decisions
//! - `docvault_rate_limit_buckets` - Gauge of live token buckets
//! - `docvault_cache_lookups{result}` - Gauge mirroring cache facade counters
//!
//! Tenant identifiers are deliberately not used as labels; the number of
//! tenants is unbounded.

use crate::admission::AdmissionDecision;
use axum::{http::StatusCode, response::IntoResponse};
use docvault_cache::CacheStats;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};

lazy_static! {
    /// Admission decisions by rejecting scope (or `none`) and outcome
    pub static ref ADMISSION_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "docvault_admission_decisions_total",
        "Admission gate decisions",
        &["scope", "outcome"]
    )
    .expect("metric can be created");

    pub static ref RATE_LIMIT_BUCKETS: Gauge = register_gauge!(
        "docvault_rate_limit_buckets",
        "Token buckets currently held by the registry"
    )
    .expect("metric can be created");

    pub static ref CACHE_LOOKUPS: GaugeVec = register_gauge_vec!(
        "docvault_cache_lookups",
        "Cache facade lookup counters by result",
        &["result"]
    )
    .expect("metric can be created");
}

/// Record one gate decision and the current bucket count.
pub fn record_admission(decision: &AdmissionDecision, bucket_count: usize) {
    let (scope, outcome) = match decision {
        AdmissionDecision::Admitted { .. } => ("none", "admitted"),
        AdmissionDecision::Denied { scope, .. } => (scope.as_str(), "denied"),
    };
    ADMISSION_DECISIONS_TOTAL
        .with_label_values(&[scope, outcome])
        .inc();
    RATE_LIMIT_BUCKETS.set(bucket_count as f64);
}

/// Copy the facade counters into the cache gauges.
pub fn update_cache_stats(stats: &CacheStats) {
    CACHE_LOOKUPS
        .with_label_values(&["local_hit"])
        .set(stats.local_hits as f64);
    CACHE_LOOKUPS
        .with_label_values(&["store_hit"])
        .set(stats.store_hits as f64);
    CACHE_LOOKUPS
        .with_label_values(&["miss"])
        .set(stats.misses as f64);
    CACHE_LOOKUPS
        .with_label_values(&["expired"])
        .set(stats.expired as f64);
    CACHE_LOOKUPS
        .with_label_values(&["error"])
        .set(stats.errors as f64);
}

/// Render every registered metric in the text exposition format.
pub fn render() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}
