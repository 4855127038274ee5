use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;


/// Closed set of entity categories. Adding a category is a compile-time
/// change: every dispatch over this enum is an exhaustive match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Aircraft,
    Vessel,
    Satellite,
    BiologicalObservation,
    Weather,
    Seismic,
    Wildlife,
    Device,
}

impl EntityType {
    /// Stable string form used in cache keys and query filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Aircraft => "aircraft",
            EntityType::Vessel => "vessel",
            EntityType::Satellite => "satellite",
            EntityType::BiologicalObservation => "biological-observation",
            EntityType::Weather => "weather",
            EntityType::Seismic => "seismic",
            EntityType::Wildlife => "wildlife",
            EntityType::Device => "device",
        }
    }
}

/// GeoJSON-style point: `coordinates = [longitude, latitude]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub coordinates: [f64; 2],
}

impl Point {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            coordinates: [longitude, latitude],
        }
    }

    /// Construct only if the coordinates pass validation; mappers use this
    /// so an entity with invalid geometry is never materialized.
    pub fn validated(longitude: f64, latitude: f64) -> Option<Self> {
        let point = Self::new(longitude, latitude);
        validate(&point).then_some(point)
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Velocity vector in provider-native units (m/s for most feeds).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

/// Optional kinematic/classification state attached to an entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
    /// Degrees clockwise from north, normalized to [0, 360).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Meters above the reference surface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Tail point of the velocity-implied trail:
    /// `position − velocity × length_factor`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_end: Option<[f64; 2]>,
}

/// Observation timing. `valid_from ≤ valid_to` when both are present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub observed_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Instantaneous observation: valid from the moment it was observed.
    pub fn at(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            valid_from: observed_at,
            valid_to: None,
        }
    }

    pub fn is_ordered(&self) -> bool {
        match self.valid_to {
            Some(valid_to) => self.valid_from <= valid_to,
            None => true,
        }
    }
}

/// The canonical cross-source record every ingestion path converges to.
///
/// Identity is `(source, id)`; `id` is only unique within its provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub geometry: Point,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<EntityState>,
    pub time: TimeRange,
    /// [0, 1]; providers that report no confidence get [`NEUTRAL_CONFIDENCE`].
    pub confidence: f64,
    pub source: String,
    /// Provider-specific fields not promoted to first-class attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
    /// Precomputed spatial index key for fast viewport membership tests.
    pub cell_key: String,
}

impl UnifiedEntity {
    /// Globally unique identity across providers.
    pub fn global_id(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }
}

/// Documented neutral default for providers that report no confidence.
/// Deliberately not zero: an unreported confidence is unknown, not absent.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Resolution of the precomputed spatial index key, in degrees.
const CELL_KEY_RESOLUTION: f64 = 0.25;

/// Geometry validator: exactly two finite coordinates, longitude within
/// [-180, 180] and latitude within [-90, 90].
pub fn validate(point: &Point) -> bool {
    let [lon, lat] = point.coordinates;
    lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat)
}

/// Normalize a heading in degrees to [0, 360).
///
/// Caller must pass a finite value; mappers drop non-finite headings before
/// reaching this point.
///
/// # Examples
///
/// ```
/// use crep::entity::normalize_heading;
///
/// assert_eq!(normalize_heading(370.0), 10.0);
/// assert_eq!(normalize_heading(-90.0), 270.0);
/// assert_eq!(normalize_heading(360.0), 0.0);
/// ```
pub fn normalize_heading(raw: f64) -> f64 {
    let normalized = raw.rem_euclid(360.0);
    // rem_euclid can land exactly on 360.0 for inputs just under a multiple
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Derive the spatial index key for a validated point. Deterministic: equal
/// coordinates always yield the same key.
pub fn cell_key(point: &Point) -> String {
    let lon_bin = (point.longitude() / CELL_KEY_RESOLUTION).floor() as i64;
    let lat_bin = (point.latitude() / CELL_KEY_RESOLUTION).floor() as i64;
    format!("c{}:{}", lat_bin, lon_bin)
}

/// Clamp a reported confidence into [0, 1], substituting the neutral default
/// for non-finite values.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        NEUTRAL_CONFIDENCE
    }
}
