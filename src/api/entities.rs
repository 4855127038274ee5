use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::{CrepEngine, EntityQuery, ResultSource};
use crate::entity::{EntityType, UnifiedEntity};

/// Shared state for the entity query API
pub struct EntitiesAppState {
    pub engine: Arc<CrepEngine>,
}

/// Query parameters for entity listing
#[derive(Deserialize)]
pub struct EntityQueryParams {
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub west: Option<f64>,
    /// Map-style alternative to explicit edges
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub zoom: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Per-type filter flags. `?aircraft=true&vessels=true` selects only
    /// those types; `?seismic=false` excludes one from the full set; no
    /// flags means every type.
    pub aircraft: Option<bool>,
    pub vessels: Option<bool>,
    pub satellites: Option<bool>,
    pub observations: Option<bool>,
    pub weather: Option<bool>,
    pub seismic: Option<bool>,
    pub wildlife: Option<bool>,
    pub devices: Option<bool>,
    pub limit: Option<usize>,
    /// Force-bypass the viewport cache
    pub refresh: Option<bool>,
}

impl EntityQueryParams {
    fn type_flags(&self) -> [(Option<bool>, EntityType); 8] {
        [
            (self.aircraft, EntityType::Aircraft),
            (self.vessels, EntityType::Vessel),
            (self.satellites, EntityType::Satellite),
            (self.observations, EntityType::BiologicalObservation),
            (self.weather, EntityType::Weather),
            (self.seismic, EntityType::Seismic),
            (self.wildlife, EntityType::Wildlife),
            (self.devices, EntityType::Device),
        ]
    }

    /// None means no filtering. Any `true` flag switches to allowlist mode;
    /// otherwise `false` flags subtract from the full set.
    fn selected_types(&self) -> Option<HashSet<EntityType>> {
        let flags = self.type_flags();
        let enabled: HashSet<EntityType> = flags
            .iter()
            .filter(|(flag, _)| *flag == Some(true))
            .map(|(_, entity_type)| *entity_type)
            .collect();
        if !enabled.is_empty() {
            return Some(enabled);
        }

        let disabled: HashSet<EntityType> = flags
            .iter()
            .filter(|(flag, _)| *flag == Some(false))
            .map(|(_, entity_type)| *entity_type)
            .collect();
        if disabled.is_empty() {
            None
        } else {
            Some(
                flags
                    .iter()
                    .map(|(_, entity_type)| *entity_type)
                    .filter(|entity_type| !disabled.contains(entity_type))
                    .collect(),
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntityListResponse {
    pub entities: Vec<UnifiedEntity>,
    pub total: usize,
    pub source: ResultSource,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create entity query router
pub fn create_entities_router(state: Arc<EntitiesAppState>) -> Router {
    Router::new()
        .route("/api/entities", get(list_entities))
        .with_state(state)
}

/// GET /api/entities - Query unified entities in a viewport
///
/// Viewport addressing: either `north`/`south`/`east`/`west` or
/// `center_lat`/`center_lon` (+ optional `zoom`, `width`, `height`).
/// Optional filters:
/// - per-type flags (e.g. ?aircraft=true&vessels=true, or ?seismic=false)
/// - `limit`: max entities returned, capped by configuration
/// - `refresh=true`: bypass the viewport cache
async fn list_entities(
    State(state): State<Arc<EntitiesAppState>>,
    Query(params): Query<EntityQueryParams>,
) -> Result<Json<EntityListResponse>, EntitiesError> {
    let config = state.engine.config();

    let viewport = super::resolve_viewport(
        (params.north, params.south, params.east, params.west),
        (params.center_lat, params.center_lon),
        params.zoom.unwrap_or(config.grid.default_zoom),
        config.grid.max_zoom,
        (params.width, params.height),
    )
    .map_err(EntitiesError::BadRequest)?;

    let types = params.selected_types();

    let limit = params.limit.unwrap_or(config.api.default_entity_limit);
    if limit == 0 || limit > config.api.max_entity_limit {
        return Err(EntitiesError::BadRequest(format!(
            "limit must be between 1 and {}",
            config.api.max_entity_limit
        )));
    }

    let result = state
        .engine
        .query_entities(EntityQuery {
            viewport,
            types,
            limit,
            refresh: params.refresh.unwrap_or(false),
        })
        .await;

    Ok(Json(EntityListResponse {
        entities: result.entities,
        total: result.total,
        source: result.source,
        timestamp: Utc::now().to_rfc3339(),
        reason: result.reason,
    }))
}

/// Entity query error types
#[derive(Debug)]
enum EntitiesError {
    BadRequest(String),
}

impl IntoResponse for EntitiesError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            EntitiesError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrepConfig;

    fn test_state() -> Arc<EntitiesAppState> {
        let mut config = CrepConfig::default();
        config.providers.aisstream_api_key = None;
        Arc::new(EntitiesAppState {
            engine: Arc::new(CrepEngine::new(config, Vec::new())),
        })
    }

    fn params() -> EntityQueryParams {
        EntityQueryParams {
            north: Some(41.0),
            south: Some(39.0),
            east: Some(-73.0),
            west: Some(-75.0),
            center_lat: None,
            center_lon: None,
            zoom: None,
            width: None,
            height: None,
            aircraft: None,
            vessels: None,
            satellites: None,
            observations: None,
            weather: None,
            seismic: None,
            wildlife: None,
            devices: None,
            limit: None,
            refresh: None,
        }
    }

    #[test]
    fn test_type_flags_select_and_exclude() {
        // No flags: no filtering
        assert!(params().selected_types().is_none());

        // True flags form an allowlist
        let mut allow = params();
        allow.aircraft = Some(true);
        allow.vessels = Some(true);
        let types = allow.selected_types().unwrap();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&EntityType::Aircraft));
        assert!(types.contains(&EntityType::Vessel));

        // False flags subtract from the full set
        let mut deny = params();
        deny.seismic = Some(false);
        let types = deny.selected_types().unwrap();
        assert_eq!(types.len(), 7);
        assert!(!types.contains(&EntityType::Seismic));

        // Allowlist wins over exclusions
        let mut mixed = params();
        mixed.aircraft = Some(true);
        mixed.seismic = Some(false);
        let types = mixed.selected_types().unwrap();
        assert_eq!(types.len(), 1);
    }

    #[tokio::test]
    async fn test_list_entities_with_no_providers() {
        let result = list_entities(State(test_state()), Query(params()))
            .await
            .unwrap();
        assert_eq!(result.0.total, 0);
        assert_eq!(result.0.source, ResultSource::Unavailable);
        assert!(result.0.reason.is_some());
    }

    #[tokio::test]
    async fn test_limit_over_cap_rejected() {
        let mut over = params();
        over.limit = Some(1_000_000);
        let error = list_entities(State(test_state()), Query(over))
            .await
            .unwrap_err();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_center_zoom_over_max_rejected() {
        let mut deep = params();
        deep.north = None;
        deep.south = None;
        deep.east = None;
        deep.west = None;
        deep.center_lat = Some(0.0);
        deep.center_lon = Some(0.0);
        deep.zoom = Some(255);
        let error = list_entities(State(test_state()), Query(deep))
            .await
            .unwrap_err();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_viewport_rejected() {
        let mut missing = params();
        missing.north = None;
        let error = list_entities(State(test_state()), Query(missing))
            .await
            .unwrap_err();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
