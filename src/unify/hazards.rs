//! Hazard feeds → weather and seismic entities.
//!
//! Both upstreams speak GeoJSON feature collections. The quake feed (USGS
//! style) carries magnitude/place/time in properties and
//! `[lon, lat, depth_km]` coordinates; the weather-alert feed carries
//! event/severity plus onset/expires, which map onto the entity's
//! validity window.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{clamp_confidence, EntityState, EntityType, Point, TimeRange, UnifiedEntity};

use super::{collect_properties, finish, num, text, UnifyBatch};

const QUAKE_SOURCE: &str = "usgs-quakes";
const WEATHER_SOURCE: &str = "weather-alerts";

pub fn unify_quakes(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    for feature in features(payload) {
        batch.push(unify_quake(feature, received_at));
    }
    batch
}

pub fn unify_weather_alerts(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    for feature in features(payload) {
        batch.push(unify_alert(feature, received_at));
    }
    batch
}

fn features(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("features")
        .and_then(Value::as_array)
        .map(|f| f.iter())
        .unwrap_or_default()
}

fn point_coordinates(feature: &Value) -> Option<(f64, f64, Option<f64>)> {
    let geometry = feature.get("geometry")?;
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return None;
    }
    let coordinates = geometry.get("coordinates")?.as_array()?;
    if coordinates.len() < 2 {
        return None;
    }
    Some((
        num(&coordinates[0])?,
        num(&coordinates[1])?,
        coordinates.get(2).and_then(num),
    ))
}

fn unify_quake(feature: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let id = feature.get("id").and_then(text)?;
    let (longitude, latitude, depth_km) = point_coordinates(feature)?;
    let geometry = Point::validated(longitude, latitude)?;

    let props = feature.get("properties");
    let magnitude = props.and_then(|p| p.get("mag")).and_then(num);
    let observed_at = props
        .and_then(|p| p.get("time"))
        .and_then(num)
        .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
        .unwrap_or(received_at);

    let properties = collect_properties(&[
        ("magnitude", magnitude.map(Value::from).unwrap_or(Value::Null)),
        (
            "place",
            props.and_then(|p| p.get("place")).and_then(text).map(Value::from).unwrap_or(Value::Null),
        ),
        ("depth_km", depth_km.map(Value::from).unwrap_or(Value::Null)),
    ]);

    Some(finish(UnifiedEntity {
        id,
        entity_type: EntityType::Seismic,
        state: Some(EntityState {
            // Hypocenter depth, below the surface
            altitude: depth_km.map(|km| -km * 1000.0),
            classification: magnitude.map(|m| format!("M{m:.1}")),
            ..Default::default()
        }),
        geometry,
        time: TimeRange::at(observed_at),
        // Instrumentally located
        confidence: clamp_confidence(0.95),
        source: QUAKE_SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}

fn unify_alert(feature: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let id = feature.get("id").and_then(text)?;
    let (longitude, latitude, _) = point_coordinates(feature)?;
    let geometry = Point::validated(longitude, latitude)?;

    let props = feature.get("properties");
    let parse_time = |key: &str| {
        props
            .and_then(|p| p.get(key))
            .and_then(text)
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    let valid_from = parse_time("onset").unwrap_or(received_at);
    let valid_to = parse_time("expires").filter(|&expires| expires >= valid_from);
    let event = props.and_then(|p| p.get("event")).and_then(text);

    let properties = collect_properties(&[
        ("event", event.clone().map(Value::from).unwrap_or(Value::Null)),
        (
            "severity",
            props.and_then(|p| p.get("severity")).cloned().unwrap_or(Value::Null),
        ),
    ]);

    Some(finish(UnifiedEntity {
        id,
        entity_type: EntityType::Weather,
        state: event.map(|event| EntityState {
            classification: Some(event),
            ..Default::default()
        }),
        geometry,
        time: TimeRange {
            observed_at: received_at,
            valid_from,
            valid_to,
        },
        confidence: clamp_confidence(0.85),
        source: WEATHER_SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}
