//! Orbital object catalog records → satellite entities.
//!
//! The catalog endpoint returns `{"objects": [{"norad_id", "name",
//! "latitude", "longitude", "altitude_km", "object_type", ...}]}` with the
//! subsatellite ground point already propagated.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{clamp_confidence, EntityType, Point, TimeRange, UnifiedEntity};

use super::{collect_properties, finish, kinematic_state, num, text, UnifyBatch};

const SOURCE: &str = "orbital-catalog";

pub fn unify_objects(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    let objects = match payload.get("objects").and_then(Value::as_array) {
        Some(objects) => objects,
        // Some mirrors return the bare array
        None => match payload.as_array() {
            Some(objects) => objects,
            None => return batch,
        },
    };

    for object in objects {
        batch.push(unify_object(object, received_at));
    }
    batch
}

fn unify_object(object: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let id = object
        .get("norad_id")
        .and_then(num)
        .map(|n| format!("{}", n as u64))
        .or_else(|| object.get("norad_id").and_then(text))?;

    let longitude = object.get("longitude").and_then(num)?;
    let latitude = object.get("latitude").and_then(num)?;
    let geometry = Point::validated(longitude, latitude)?;

    let altitude = object.get("altitude_km").and_then(num).map(|km| km * 1000.0);
    let classification = object.get("object_type").and_then(text);

    let properties = collect_properties(&[
        ("name", object.get("name").and_then(text).map(Value::from).unwrap_or(Value::Null)),
        (
            "object_type",
            classification.clone().map(Value::from).unwrap_or(Value::Null),
        ),
    ]);

    // Debris positions come from propagated elements of varying age
    let confidence = match classification.as_deref() {
        Some("debris") => 0.6,
        _ => 0.75,
    };

    Some(finish(UnifiedEntity {
        id,
        entity_type: EntityType::Satellite,
        state: Some(kinematic_state(&geometry, None, None, altitude, classification)),
        geometry,
        time: TimeRange::at(received_at),
        confidence: clamp_confidence(confidence),
        source: SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}
