use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::engine::CrepEngine;

/// Shared state for the tile API
pub struct TilesAppState {
    pub engine: Arc<CrepEngine>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create probability tile router
pub fn create_tiles_router(state: Arc<TilesAppState>) -> Router {
    Router::new()
        .route("/api/tiles/probability/:z/:x/:y", get(probability_tile))
        .with_state(state)
}

/// GET /api/tiles/probability/:z/:x/:y - PNG heat overlay for one
/// Web-Mercator tile. Cacheable: `Cache-Control` max-age follows the
/// viewport cache TTL.
async fn probability_tile(
    State(state): State<Arc<TilesAppState>>,
    Path((z, x, y)): Path<(u8, u32, u32)>,
) -> Result<Response, TilesError> {
    let config = state.engine.config();
    if z > config.grid.max_zoom {
        return Err(TilesError::BadRequest(format!(
            "zoom must be at most {}",
            config.grid.max_zoom
        )));
    }
    let tiles_per_side = 1u64 << z;
    if x as u64 >= tiles_per_side || y as u64 >= tiles_per_side {
        return Err(TilesError::BadRequest(format!(
            "tile coordinates out of range for zoom {z}"
        )));
    }

    let png = state.engine.probability_tile(z, x, y).await;
    let max_age = config.cache.ttl().as_secs();
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, format!("public, max-age={max_age}")),
        ],
        png,
    )
        .into_response())
}

/// Tile error types
#[derive(Debug)]
enum TilesError {
    BadRequest(String),
}

impl IntoResponse for TilesError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            TilesError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
