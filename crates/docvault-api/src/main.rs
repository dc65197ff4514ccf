//! DocVault Gateway
//!
//! Admission control and cache diagnostics in front of the document
//! services.

use docvault_api::routes::{router, AppState};
use docvault_api::AdmissionGate;
use docvault_cache::CacheFacade;
use docvault_core::GatewayConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;

    tracing::info!(
        tenant_capacity = config.rate_limits.tenant.capacity,
        endpoint_capacity = config.rate_limits.endpoint.capacity,
        tenant_header = %config.rate_limits.tenant_header,
        "Rate limits configured"
    );

    let gate = AdmissionGate::from_settings(&config.rate_limits)?;
    let cache = CacheFacade::from_settings(&config.cache).await?;
    tracing::info!(backend = cache.backend_name(), "Cache facade ready");

    let app = router(AppState {
        gate: Arc::new(gate),
        cache: Arc::new(cache),
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port()));
    tracing::info!("DocVault gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
