use super::*;
use crate::entity::EntityType;
use chrono::{TimeZone, Utc};
use serde_json::json;

fn received() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 9, 12, 0, 0).unwrap()
}

fn opensky_payload() -> serde_json::Value {
    json!({
        "time": 1770638400,
        "states": [
            ["abc123", "UAL123  ", "United States", null, 1770638390,
             -73.97, 40.71, 10058.4, false, 250.0, 95.0, 0.0, null, 10100.0, "7710", false, 0],
            ["def456", null, "Canada", null, 1770638395,
             null, 48.2, null, false, null, null, null, null, null, null, false, 0]
        ]
    })
}

#[test]
fn test_opensky_unify_maps_fields() {
    let batch = opensky::unify_states(&opensky_payload(), received());

    assert_eq!(batch.entities.len(), 1);
    assert_eq!(batch.dropped, 1, "record with null longitude is dropped");

    let aircraft = &batch.entities[0];
    assert_eq!(aircraft.id, "abc123");
    assert_eq!(aircraft.entity_type, EntityType::Aircraft);
    assert_eq!(aircraft.source, "opensky");
    assert_eq!(aircraft.geometry.longitude(), -73.97);
    assert_eq!(aircraft.geometry.latitude(), 40.71);
    assert!(!aircraft.cell_key.is_empty());
    assert_eq!(aircraft.properties["callsign"], json!("UAL123"));

    let state = aircraft.state.as_ref().unwrap();
    assert_eq!(state.heading, Some(95.0));
    assert_eq!(state.altitude, Some(10100.0));
    assert!(state.velocity.is_some());

    // observed_at comes from last_contact, not the injected clock
    assert_eq!(aircraft.time.observed_at.timestamp(), 1770638390);
}

#[test]
fn test_opensky_unify_is_deterministic() {
    let payload = opensky_payload();
    let first = opensky::unify_states(&payload, received());
    let second = opensky::unify_states(&payload, received());
    assert_eq!(first.entities, second.entities);
    assert_eq!(first.dropped, second.dropped);
}

#[test]
fn test_nan_longitude_is_dropped_and_counted() {
    // JSON has no NaN literal; a quoted "NaN" string parses to a non-finite
    // float and must be rejected by validation
    let payload = json!({
        "states": [
            ["aaa111", null, null, null, null, "NaN", 40.0, null, false, null, null],
            ["bbb222", null, null, null, null, -73.5, 40.0, null, false, null, null]
        ]
    });
    let batch = opensky::unify_states(&payload, received());
    assert_eq!(batch.entities.len(), 1);
    assert_eq!(batch.dropped, 1);
    assert_eq!(batch.entities[0].id, "bbb222");
}

#[test]
fn test_trail_end_points_opposite_velocity() {
    let payload = json!({
        "states": [
            // Heading due east at 100 m/s
            ["ccc333", null, null, null, null, 10.0, 50.0, null, false, 100.0, 90.0]
        ]
    });
    let batch = opensky::unify_states(&payload, received());
    let state = batch.entities[0].state.as_ref().unwrap();
    let trail = state.trail_end.unwrap();

    // Trail tail sits west of the position, same latitude
    assert!(trail[0] < 10.0);
    assert!((trail[1] - 50.0).abs() < 1e-9);
    let expected_lon = 10.0 - 100.0 * TRAIL_LENGTH_FACTOR;
    assert!((trail[0] - expected_lon).abs() < 1e-9);
}

#[test]
fn test_aisstream_position_report() {
    let message = json!({
        "MessageType": "PositionReport",
        "MetaData": {
            "MMSI": 367001234u64,
            "ShipName": "EVER GIVEN ",
            "time_utc": "2026-02-09 11:59:30.123456789 +0000 UTC"
        },
        "Message": {
            "PositionReport": {
                "UserID": 367001234u64,
                "Latitude": 40.5,
                "Longitude": -73.8,
                "Sog": 12.3,
                "Cog": 181.0,
                "TrueHeading": 180.0,
                "NavigationalStatus": 0
            }
        }
    });

    let vessel = aisstream::unify_message(&message, received()).unwrap();
    assert_eq!(vessel.id, "367001234");
    assert_eq!(vessel.entity_type, EntityType::Vessel);
    assert_eq!(vessel.source, "aisstream");
    assert_eq!(vessel.properties["ship_name"], json!("EVER GIVEN"));
    assert_eq!(vessel.time.observed_at.timestamp(), received().timestamp() - 30);

    let state = vessel.state.as_ref().unwrap();
    assert_eq!(state.heading, Some(180.0));
    // 12.3 knots southbound: vy negative
    assert!(state.velocity.unwrap().y < 0.0);
}

#[test]
fn test_aisstream_ignores_non_position_messages() {
    let chatter = json!({"MessageType": "ShipStaticData", "MetaData": {}, "Message": {}});
    assert!(aisstream::unify_message(&chatter, received()).is_none());

    let batch = aisstream::unify_messages(&[chatter], received());
    assert_eq!(batch.entities.len(), 0);
    assert_eq!(batch.dropped, 0, "non-position chatter is not a drop");
}

#[test]
fn test_aisstream_heading_sentinel_falls_back_to_cog() {
    let message = json!({
        "MessageType": "PositionReport",
        "MetaData": {"MMSI": 1234567u64},
        "Message": {"PositionReport": {
            "UserID": 1234567u64, "Latitude": 10.0, "Longitude": 10.0,
            "Sog": 5.0, "Cog": 45.0, "TrueHeading": 511.0
        }}
    });
    let vessel = aisstream::unify_message(&message, received()).unwrap();
    assert_eq!(vessel.state.as_ref().unwrap().heading, Some(45.0));
}

#[test]
fn test_satellite_objects() {
    let payload = json!({
        "objects": [
            {"norad_id": 25544, "name": "ISS (ZARYA)", "latitude": 51.6,
             "longitude": -0.1, "altitude_km": 420.0, "object_type": "payload"},
            {"norad_id": 99999, "name": "FRAG", "latitude": 200.0,
             "longitude": 0.0, "object_type": "debris"}
        ]
    });
    let batch = satellites::unify_objects(&payload, received());
    assert_eq!(batch.entities.len(), 1);
    assert_eq!(batch.dropped, 1, "latitude 200 fails validation");

    let iss = &batch.entities[0];
    assert_eq!(iss.id, "25544");
    assert_eq!(iss.entity_type, EntityType::Satellite);
    assert_eq!(iss.state.as_ref().unwrap().altitude, Some(420_000.0));
}

#[test]
fn test_inaturalist_taxon_routing_and_confidence() {
    let payload = json!({
        "results": [
            {"id": 1001, "geojson": {"coordinates": [-73.9, 40.7]},
             "taxon": {"name": "Amanita muscaria", "iconic_taxon_name": "Fungi"},
             "quality_grade": "research",
             "time_observed_at": "2026-02-08T15:30:00-05:00"},
            {"id": 1002, "geojson": {"coordinates": [-73.8, 40.6]},
             "taxon": {"name": "Buteo jamaicensis", "iconic_taxon_name": "Aves"},
             "quality_grade": "needs_id"}
        ]
    });
    let batch = inaturalist::unify_observations(&payload, received());
    assert_eq!(batch.entities.len(), 2);

    let fungus = &batch.entities[0];
    assert_eq!(fungus.entity_type, EntityType::BiologicalObservation);
    assert_eq!(fungus.confidence, 0.9);
    assert_eq!(
        fungus.state.as_ref().unwrap().classification.as_deref(),
        Some("Amanita muscaria")
    );
    // Parsed from time_observed_at, converted to UTC
    assert_eq!(fungus.time.observed_at.to_rfc3339(), "2026-02-08T20:30:00+00:00");

    let hawk = &batch.entities[1];
    assert_eq!(hawk.entity_type, EntityType::Wildlife);
    assert_eq!(hawk.confidence, crate::entity::NEUTRAL_CONFIDENCE);
}

#[test]
fn test_quake_and_weather_features() {
    let quakes = json!({
        "features": [
            {"id": "us7000abcd",
             "properties": {"mag": 4.5, "place": "10km W of Somewhere", "time": 1770638000000i64},
             "geometry": {"type": "Point", "coordinates": [-120.5, 36.2, 8.3]}}
        ]
    });
    let batch = hazards::unify_quakes(&quakes, received());
    assert_eq!(batch.entities.len(), 1);
    let quake = &batch.entities[0];
    assert_eq!(quake.entity_type, EntityType::Seismic);
    assert_eq!(quake.state.as_ref().unwrap().altitude, Some(-8300.0));
    assert_eq!(quake.properties["magnitude"], json!(4.5));

    let alerts = json!({
        "features": [
            {"id": "alert-1",
             "properties": {"event": "Tornado Warning", "severity": "Extreme",
                            "onset": "2026-02-09T11:00:00Z", "expires": "2026-02-09T13:00:00Z"},
             "geometry": {"type": "Point", "coordinates": [-97.5, 35.4]}}
        ]
    });
    let batch = hazards::unify_weather_alerts(&alerts, received());
    let alert = &batch.entities[0];
    assert_eq!(alert.entity_type, EntityType::Weather);
    assert!(alert.time.is_ordered());
    assert!(alert.time.valid_to.is_some());
}

#[test]
fn test_device_records() {
    let payload = json!({
        "devices": [
            {"device_id": "myco-007", "kind": "spore-trap", "lat": 45.5, "lon": -122.6,
             "battery": 87, "recorded_at": "2026-02-09T10:00:00Z"}
        ]
    });
    let batch = devices::unify_devices(&payload, received());
    assert_eq!(batch.entities.len(), 1);
    let device = &batch.entities[0];
    assert_eq!(device.entity_type, EntityType::Device);
    assert_eq!(device.confidence, 1.0);
    assert_eq!(device.properties["battery"], json!(87));
}

#[test]
fn test_dedup_same_source_id_pair_keeps_one() {
    let payload = opensky_payload();
    let mut entities = opensky::unify_states(&payload, received()).entities;
    let mut again = opensky::unify_states(&payload, received()).entities;
    entities.append(&mut again);

    let (merged, duplicates) = dedup_entities(entities);
    assert_eq!(merged.len(), 1);
    assert_eq!(duplicates, 1);
}

#[test]
fn test_dedup_newer_observation_wins() {
    let payload = opensky_payload();
    let old = opensky::unify_states(&payload, received()).entities.remove(0);
    let mut newer = old.clone();
    newer.time.observed_at = old.time.observed_at + chrono::Duration::seconds(60);
    newer.geometry = crate::entity::Point::new(-73.9, 40.8);

    let (merged, duplicates) = dedup_entities(vec![old.clone(), newer.clone()]);
    assert_eq!(merged.len(), 1);
    assert_eq!(duplicates, 1);
    assert_eq!(merged[0].geometry, newer.geometry);

    // Order independence of the winner
    let (merged_rev, _) = dedup_entities(vec![newer.clone(), old]);
    assert_eq!(merged_rev[0].geometry, newer.geometry);
}

#[test]
fn test_num_accepts_quoted_floats() {
    assert_eq!(num(&json!("3.25")), Some(3.25));
    assert_eq!(num(&json!(3.25)), Some(3.25));
    assert_eq!(num(&json!("NaN")), None);
    assert_eq!(num(&json!(null)), None);
    assert_eq!(num(&json!("abc")), None);
}
