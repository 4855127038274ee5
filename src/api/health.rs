use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::engine::{CrepEngine, HealthReport};

/// Shared state for the health API
pub struct HealthAppState {
    pub engine: Arc<CrepEngine>,
}

/// Create health router
pub fn create_health_router(state: Arc<HealthAppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .with_state(state)
}

/// GET /api/health - Service status: uptime, stream session, cache size,
/// per-provider configuration and lifetime counters.
async fn health(State(state): State<Arc<HealthAppState>>) -> Json<HealthReport> {
    Json(state.engine.health())
}
