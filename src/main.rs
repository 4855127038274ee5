use anyhow::{Context, Result};
use crep::api::{
    create_entities_router, create_grid_router, create_health_router, create_tiles_router,
    EntitiesAppState, GridAppState, HealthAppState, TilesAppState,
};
use crep::config::CrepConfig;
use crep::engine::CrepEngine;
use crep::providers::build_sources;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crep=info".into()),
        )
        .init();

    info!("CREP aggregation engine starting...");

    let config = CrepConfig::from_env().context("Failed to load configuration")?;
    let bind_addr = config.api.bind_addr.clone();

    let sources = build_sources(&config.providers);
    info!(
        providers = sources.len(),
        stream_configured = config.providers.aisstream_api_key.is_some(),
        "Providers initialized"
    );

    let engine = Arc::new(CrepEngine::new(config, sources));

    let router = create_entities_router(Arc::new(EntitiesAppState {
        engine: Arc::clone(&engine),
    }))
    .merge(create_grid_router(Arc::new(GridAppState {
        engine: Arc::clone(&engine),
    })))
    .merge(create_tiles_router(Arc::new(TilesAppState {
        engine: Arc::clone(&engine),
    })))
    .merge(create_health_router(Arc::new(HealthAppState {
        engine: Arc::clone(&engine),
    })))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("CREP aggregation engine stopped");

    Ok(())
}
