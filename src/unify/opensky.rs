//! OpenSky Network state vectors → aircraft entities.
//!
//! `/states/all` returns `{"time": ..., "states": [[...], ...]}` where each
//! state is a positional array: 0 icao24, 1 callsign, 2 origin_country,
//! 5 longitude, 6 latitude, 7 baro_altitude (m), 8 on_ground, 9 velocity
//! (m/s), 10 true_track (deg), 13 geo_altitude (m).

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{clamp_confidence, EntityType, Point, TimeRange, UnifiedEntity};

use super::{collect_properties, finish, kinematic_state, num, text, UnifyBatch};

const SOURCE: &str = "opensky";

/// Unify a full `/states/all` payload. Records with missing or invalid
/// coordinates are dropped and counted, never erroring the batch.
pub fn unify_states(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    let states = match payload.get("states").and_then(Value::as_array) {
        Some(states) => states,
        None => return batch,
    };

    for state in states {
        batch.push(unify_state(state, received_at));
    }
    batch
}

fn unify_state(state: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let fields = state.as_array()?;
    let id = text(fields.first()?)?;

    let longitude = num(fields.get(5)?)?;
    let latitude = num(fields.get(6)?)?;
    let geometry = Point::validated(longitude, latitude)?;

    // last_contact (index 4) is the provider's own observation time
    let observed_at = fields
        .get(4)
        .and_then(num)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .unwrap_or(received_at);

    let altitude = fields.get(13).and_then(num).or_else(|| fields.get(7).and_then(num));
    let speed = fields.get(9).and_then(num);
    let heading = fields.get(10).and_then(num);

    let callsign = fields.get(1).and_then(text);
    let properties = collect_properties(&[
        ("callsign", callsign.clone().map(Value::from).unwrap_or(Value::Null)),
        (
            "origin_country",
            fields.get(2).and_then(text).map(Value::from).unwrap_or(Value::Null),
        ),
        (
            "on_ground",
            fields.get(8).and_then(Value::as_bool).map(Value::from).unwrap_or(Value::Null),
        ),
    ]);

    Some(finish(UnifiedEntity {
        id,
        entity_type: EntityType::Aircraft,
        state: Some(kinematic_state(&geometry, speed, heading, altitude, callsign)),
        geometry,
        time: TimeRange::at(observed_at),
        // OpenSky positions are transponder-derived
        confidence: clamp_confidence(0.9),
        source: SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}
