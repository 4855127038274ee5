//! AISStream websocket messages → vessel entities.
//!
//! Position reports arrive as
//! `{"MessageType": "PositionReport", "MetaData": {...}, "Message":
//! {"PositionReport": {...}}}`. MetaData carries MMSI, ship name and the
//! report timestamp; the inner report carries position and kinematics
//! (Sog in knots, Cog/TrueHeading in degrees).

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{clamp_confidence, EntityType, Point, TimeRange, UnifiedEntity};

use super::{collect_properties, finish, kinematic_state, num, text, UnifyBatch};

const SOURCE: &str = "aisstream";
const KNOTS_TO_MS: f64 = 0.514444;

/// AIS true-heading sentinel for "not available".
const HEADING_UNAVAILABLE: f64 = 511.0;

/// Unify one websocket message. Non-position message types yield no entity
/// without counting as a drop; malformed position reports are dropped.
pub fn unify_message(message: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let kind = message.get("MessageType").and_then(Value::as_str)?;
    if kind != "PositionReport" {
        return None;
    }
    let meta = message.get("MetaData")?;
    let report = message.get("Message")?.get("PositionReport")?;

    let longitude = report.get("Longitude").and_then(num)?;
    let latitude = report.get("Latitude").and_then(num)?;
    let geometry = Point::validated(longitude, latitude)?;

    let mmsi = report
        .get("UserID")
        .and_then(num)
        .map(|m| format!("{}", m as u64))
        .or_else(|| meta.get("MMSI").and_then(num).map(|m| format!("{}", m as u64)))?;

    let observed_at = meta
        .get("time_utc")
        .and_then(text)
        .and_then(|t| parse_ais_time(&t))
        .unwrap_or(received_at);

    let speed = report
        .get("Sog")
        .and_then(num)
        .map(|knots| knots * KNOTS_TO_MS);
    let heading = report
        .get("TrueHeading")
        .and_then(num)
        .filter(|&h| h != HEADING_UNAVAILABLE)
        .or_else(|| report.get("Cog").and_then(num));

    let ship_name = meta.get("ShipName").and_then(text);
    let properties = collect_properties(&[
        ("ship_name", ship_name.clone().map(Value::from).unwrap_or(Value::Null)),
        (
            "nav_status",
            report.get("NavigationalStatus").cloned().unwrap_or(Value::Null),
        ),
    ]);

    Some(finish(UnifiedEntity {
        id: mmsi,
        entity_type: EntityType::Vessel,
        state: Some(kinematic_state(&geometry, speed, heading, None, ship_name)),
        geometry,
        time: TimeRange::at(observed_at),
        // AIS is self-reported; receivers occasionally relay garbage
        confidence: clamp_confidence(0.8),
        source: SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}

/// Unify a batch of buffered messages (used when draining a replayed frame
/// list). Drop accounting matches the single-message path.
pub fn unify_messages(messages: &[Value], received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    for message in messages {
        // Non-position chatter is not a drop; only failed position reports are
        let is_position = message.get("MessageType").and_then(Value::as_str) == Some("PositionReport");
        match unify_message(message, received_at) {
            Some(entity) => batch.entities.push(entity),
            None if is_position => batch.dropped += 1,
            None => {}
        }
    }
    batch
}

/// AISStream stamps e.g. `"2026-02-09 12:34:56.789012345 +0000 UTC"`.
fn parse_ais_time(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim_end_matches(" UTC");
    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
