use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{CrepEngine, GridProbabilityResult};

/// Shared state for the grid probability API
pub struct GridAppState {
    pub engine: Arc<CrepEngine>,
}

/// Query parameters for the probability surface
#[derive(Deserialize)]
pub struct GridQueryParams {
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub west: Option<f64>,
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub zoom: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Grid partitioning zoom; defaults from configuration
    pub zoom_level: Option<u8>,
    pub refresh: Option<bool>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create grid probability router
pub fn create_grid_router(state: Arc<GridAppState>) -> Router {
    Router::new()
        .route("/api/grid/probability", get(grid_probability))
        .with_state(state)
}

/// GET /api/grid/probability - Per-cell probability surface for a viewport
///
/// `zoom_level` selects the grid resolution (cells shrink as it grows) and
/// is validated against the configured maximum; the cell count per response
/// is capped by configuration regardless.
async fn grid_probability(
    State(state): State<Arc<GridAppState>>,
    Query(params): Query<GridQueryParams>,
) -> Result<Json<GridProbabilityResult>, GridError> {
    let config = state.engine.config();

    let viewport = super::resolve_viewport(
        (params.north, params.south, params.east, params.west),
        (params.center_lat, params.center_lon),
        params.zoom.unwrap_or(config.grid.default_zoom),
        config.grid.max_zoom,
        (params.width, params.height),
    )
    .map_err(GridError::BadRequest)?;

    let zoom_level = params.zoom_level.unwrap_or(config.grid.default_zoom);
    if zoom_level > config.grid.max_zoom {
        return Err(GridError::BadRequest(format!(
            "zoom_level must be at most {}",
            config.grid.max_zoom
        )));
    }

    let result = state
        .engine
        .grid_probability(viewport, zoom_level, params.refresh.unwrap_or(false))
        .await;
    Ok(Json(result))
}

/// Grid query error types
#[derive(Debug)]
enum GridError {
    BadRequest(String),
}

impl IntoResponse for GridError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            GridError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
