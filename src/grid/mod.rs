use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::entity::Point;


/// Geographic bounding box defining the area of interest for a query.
///
/// No antimeridian wrapping: `west < east` always. Viewports crossing the
/// date line must be split by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Viewport {
    pub fn is_valid(&self) -> bool {
        self.north.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.west.is_finite()
            && self.north > self.south
            && self.east > self.west
            && self.north <= 90.0
            && self.south >= -90.0
            && self.east <= 180.0
            && self.west >= -180.0
    }

    /// Convert a map-style `(center, zoom, pixel size)` query into a
    /// viewport, using the Web-Mercator degrees-per-pixel scale at the
    /// given zoom. Clamped to the valid coordinate ranges.
    pub fn from_center(center_lat: f64, center_lon: f64, zoom: u8, width: u32, height: u32) -> Self {
        let deg_per_pixel = 360.0 / (256.0 * 2f64.powi(zoom as i32));
        let half_lon = width as f64 / 2.0 * deg_per_pixel;
        let half_lat = height as f64 / 2.0 * deg_per_pixel;
        Self {
            north: (center_lat + half_lat).min(90.0),
            south: (center_lat - half_lat).max(-90.0),
            east: (center_lon + half_lon).min(180.0),
            west: (center_lon - half_lon).max(-180.0),
        }
    }

    pub fn contains(&self, point: &Point) -> bool {
        let lon = point.longitude();
        let lat = point.latitude();
        lat <= self.north && lat >= self.south && lon <= self.east && lon >= self.west
    }
}

/// Bounds of a single grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl CellBounds {
    pub fn contains(&self, point: &Point) -> bool {
        let lon = point.longitude();
        let lat = point.latitude();
        // Half-open on the north/east edges so adjacent cells never both
        // claim a boundary point
        lat < self.north && lat >= self.south && lon < self.east && lon >= self.west
    }

    pub fn center(&self) -> CellCenter {
        CellCenter {
            lat: (self.north + self.south) / 2.0,
            lon: (self.east + self.west) / 2.0,
        }
    }

    /// Cell area in square degrees, used for density normalization.
    pub fn area_deg2(&self) -> f64 {
        (self.north - self.south) * (self.east - self.west)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellCenter {
    pub lat: f64,
    pub lon: f64,
}

/// One tile of a deterministic partition of a viewport at a given zoom.
/// Ephemeral: computed per request, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// `"{zoom}-{x}-{y}"` in the global equirectangular grid; stable across
    /// process restarts so cache keys derived from it are stable too.
    pub id: String,
    pub bounds: CellBounds,
    pub center: CellCenter,
}

/// Side length in degrees of a grid cell at `zoom` in the global
/// equirectangular partitioning: 180° / 2^zoom (square in degrees).
pub fn cell_size_deg(zoom: u8) -> f64 {
    180.0 / (1u64 << zoom) as f64
}

/// Partition a viewport into grid cells at the given zoom.
///
/// Cells come from a fixed global grid, so identical inputs always produce an
/// identical ordered list (north-to-south rows, west-to-east within a row)
/// and the tiling is non-overlapping. Edge cells may extend past the
/// viewport. At most `max_cells` cells are returned, taken in that same
/// documented ordering; the cap is cost control against arbitrarily fine
/// zoom levels.
pub fn calculate_grid_cells(viewport: &Viewport, zoom: u8, max_cells: usize) -> Vec<GridCell> {
    let size = cell_size_deg(zoom);

    // Global grid indices: x grows eastward from -180, y grows southward
    // from +90
    let x_min = ((viewport.west + 180.0) / size).floor() as i64;
    let x_max = ((viewport.east + 180.0) / size).ceil() as i64 - 1;
    let y_min = ((90.0 - viewport.north) / size).floor() as i64;
    let y_max = ((90.0 - viewport.south) / size).ceil() as i64 - 1;

    let mut cells = Vec::new();
    'rows: for y in y_min..=y_max.max(y_min) {
        for x in x_min..=x_max.max(x_min) {
            if cells.len() >= max_cells {
                break 'rows;
            }
            let bounds = CellBounds {
                north: 90.0 - y as f64 * size,
                south: 90.0 - (y + 1) as f64 * size,
                west: -180.0 + x as f64 * size,
                east: -180.0 + (x + 1) as f64 * size,
            };
            cells.push(GridCell {
                id: format!("{zoom}-{x}-{y}"),
                center: bounds.center(),
                bounds,
            });
        }
    }
    cells
}

/// Latitude of a (possibly fractional) Web-Mercator tile row, using the
/// standard `atan(sinh(π(1 − 2y/n)))` formula.
pub fn mercator_lat(zoom: u8, row: f64) -> f64 {
    let n = (1u64 << zoom) as f64;
    (PI * (1.0 - 2.0 * row / n)).sinh().atan().to_degrees()
}

/// Web-Mercator tile bounds for raster-tile-style consumers.
pub fn tile_to_bounds(zoom: u8, x: u32, y: u32) -> CellBounds {
    let n = (1u64 << zoom) as f64;
    CellBounds {
        west: x as f64 / n * 360.0 - 180.0,
        east: (x + 1) as f64 / n * 360.0 - 180.0,
        north: mercator_lat(zoom, y as f64),
        south: mercator_lat(zoom, (y + 1) as f64),
    }
}
