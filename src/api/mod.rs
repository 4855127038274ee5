// HTTP API: entity queries, probability grids, heat tiles, health

pub mod entities;
pub mod grid;
pub mod health;
pub mod tiles;

pub use entities::{create_entities_router, EntitiesAppState};
pub use grid::{create_grid_router, GridAppState};
pub use health::{create_health_router, HealthAppState};
pub use tiles::{create_tiles_router, TilesAppState};

use crate::grid::Viewport;

const DEFAULT_VIEW_WIDTH: u32 = 1024;
const DEFAULT_VIEW_HEIGHT: u32 = 768;

/// Resolve the two viewport-addressing styles shared by the query endpoints:
/// explicit edges (`north/south/east/west`) or a map-style center
/// (`center_lat/center_lon` plus optional `zoom`, `width`, `height`).
/// Explicit edges win when both are present. `zoom` is validated against
/// the configured maximum before it reaches the viewport math.
pub(crate) fn resolve_viewport(
    edges: (Option<f64>, Option<f64>, Option<f64>, Option<f64>),
    center: (Option<f64>, Option<f64>),
    zoom: u8,
    max_zoom: u8,
    size: (Option<u32>, Option<u32>),
) -> Result<Viewport, String> {
    if let (Some(north), Some(south), Some(east), Some(west)) = edges {
        let viewport = Viewport {
            north,
            south,
            east,
            west,
        };
        if !viewport.is_valid() {
            return Err(
                "invalid viewport: require south < north and west < east within coordinate ranges"
                    .to_string(),
            );
        }
        return Ok(viewport);
    }

    if let (Some(center_lat), Some(center_lon)) = center {
        if zoom > max_zoom {
            return Err(format!("zoom must be at most {max_zoom}"));
        }
        if !(-90.0..=90.0).contains(&center_lat) || !(-180.0..=180.0).contains(&center_lon) {
            return Err("center coordinates out of range".to_string());
        }
        let viewport = Viewport::from_center(
            center_lat,
            center_lon,
            zoom,
            size.0.unwrap_or(DEFAULT_VIEW_WIDTH),
            size.1.unwrap_or(DEFAULT_VIEW_HEIGHT),
        );
        if !viewport.is_valid() {
            return Err("center viewport degenerate at this zoom".to_string());
        }
        return Ok(viewport);
    }

    Err("viewport required: pass north/south/east/west or center_lat/center_lon".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_edges_win_over_center() {
        let viewport = resolve_viewport(
            (Some(41.0), Some(39.0), Some(-73.0), Some(-75.0)),
            (Some(0.0), Some(0.0)),
            8,
            14,
            (None, None),
        )
        .unwrap();
        assert_eq!(viewport.north, 41.0);
        assert_eq!(viewport.west, -75.0);
    }

    #[test]
    fn test_center_addressing() {
        let viewport = resolve_viewport(
            (None, None, None, None),
            (Some(40.0), Some(-74.0)),
            8,
            14,
            (None, None),
        )
        .unwrap();
        assert!(viewport.contains(&crate::entity::Point::new(-74.0, 40.0)));
        assert!(viewport.is_valid());
    }

    #[test]
    fn test_missing_viewport_is_an_error() {
        let error = resolve_viewport((None, None, None, None), (None, None), 8, 14, (None, None))
            .unwrap_err();
        assert!(error.contains("viewport required"));
    }

    #[test]
    fn test_inverted_edges_rejected() {
        let error = resolve_viewport(
            (Some(39.0), Some(41.0), Some(-73.0), Some(-75.0)),
            (None, None),
            8,
            14,
            (None, None),
        )
        .unwrap_err();
        assert!(error.contains("invalid viewport"));
    }

    #[test]
    fn test_center_zoom_over_max_rejected() {
        let error = resolve_viewport(
            (None, None, None, None),
            (Some(0.0), Some(0.0)),
            255,
            14,
            (None, None),
        )
        .unwrap_err();
        assert!(error.contains("zoom must be at most 14"));
    }
}
