//! Field-device telemetry records → device entities.
//!
//! Device gateways report a flat shape: `{"devices": [{"device_id", "kind",
//! "lat", "lon", "battery", "recorded_at"}]}`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{
    clamp_confidence, EntityState, EntityType, Point, TimeRange, UnifiedEntity,
};

use super::{collect_properties, finish, num, text, UnifyBatch};

const SOURCE: &str = "field-devices";

pub fn unify_devices(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    let devices = match payload.get("devices").and_then(Value::as_array) {
        Some(devices) => devices,
        None => return batch,
    };

    for device in devices {
        batch.push(unify_device(device, received_at));
    }
    batch
}

fn unify_device(device: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let id = device.get("device_id").and_then(text)?;

    let longitude = device.get("lon").and_then(num)?;
    let latitude = device.get("lat").and_then(num)?;
    let geometry = Point::validated(longitude, latitude)?;

    let observed_at = device
        .get("recorded_at")
        .and_then(text)
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(received_at);

    let kind = device.get("kind").and_then(text);
    let properties = collect_properties(&[
        ("kind", kind.clone().map(Value::from).unwrap_or(Value::Null)),
        ("battery", device.get("battery").cloned().unwrap_or(Value::Null)),
    ]);

    Some(finish(UnifiedEntity {
        id,
        entity_type: EntityType::Device,
        state: kind.map(|kind| EntityState {
            classification: Some(kind),
            ..Default::default()
        }),
        geometry,
        time: TimeRange::at(observed_at),
        // Fixed installations with known positions
        confidence: clamp_confidence(1.0),
        source: SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}
