//! iNaturalist observation records → biological-observation / wildlife
//! entities.
//!
//! `/observations` returns `{"results": [{"id", "geojson": {"coordinates":
//! [lon, lat]}, "taxon": {"name", "iconic_taxon_name"}, "quality_grade",
//! "time_observed_at", ...}]}`. Fungi and plants map to
//! biological-observation; animals map to wildlife.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entity::{
    clamp_confidence, EntityState, EntityType, Point, TimeRange, UnifiedEntity,
    NEUTRAL_CONFIDENCE,
};

use super::{collect_properties, finish, num, text, UnifyBatch};

const SOURCE: &str = "inaturalist";

pub fn unify_observations(payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
    let mut batch = UnifyBatch::default();
    let results = match payload.get("results").and_then(Value::as_array) {
        Some(results) => results,
        None => return batch,
    };

    for observation in results {
        batch.push(unify_observation(observation, received_at));
    }
    batch
}

fn unify_observation(observation: &Value, received_at: DateTime<Utc>) -> Option<UnifiedEntity> {
    let id = observation
        .get("id")
        .and_then(num)
        .map(|n| format!("{}", n as u64))
        .or_else(|| observation.get("id").and_then(text))?;

    let coordinates = observation
        .get("geojson")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array)?;
    if coordinates.len() != 2 {
        return None;
    }
    let longitude = num(&coordinates[0])?;
    let latitude = num(&coordinates[1])?;
    let geometry = Point::validated(longitude, latitude)?;

    let observed_at = observation
        .get("time_observed_at")
        .and_then(text)
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(received_at);

    let taxon = observation.get("taxon");
    let taxon_name = taxon.and_then(|t| t.get("name")).and_then(text);
    let iconic = taxon
        .and_then(|t| t.get("iconic_taxon_name"))
        .and_then(text);

    // Animal taxa are wildlife sightings; everything else (fungi, plants,
    // protozoa, unknown) stays a biological observation
    let entity_type = match iconic.as_deref() {
        Some("Aves") | Some("Mammalia") | Some("Reptilia") | Some("Amphibia")
        | Some("Actinopterygii") | Some("Insecta") | Some("Arachnida") | Some("Mollusca") => {
            EntityType::Wildlife
        }
        _ => EntityType::BiologicalObservation,
    };

    // Community-verified records are trustworthy; unverified ones get the
    // neutral default, not zero
    let confidence = match observation.get("quality_grade").and_then(Value::as_str) {
        Some("research") => 0.9,
        Some("needs_id") => NEUTRAL_CONFIDENCE,
        Some("casual") => 0.3,
        _ => NEUTRAL_CONFIDENCE,
    };

    let properties = collect_properties(&[
        ("taxon", taxon_name.clone().map(Value::from).unwrap_or(Value::Null)),
        ("iconic_taxon", iconic.map(Value::from).unwrap_or(Value::Null)),
        (
            "quality_grade",
            observation.get("quality_grade").cloned().unwrap_or(Value::Null),
        ),
    ]);

    Some(finish(UnifiedEntity {
        id,
        entity_type,
        geometry,
        state: taxon_name.map(|name| EntityState {
            classification: Some(name),
            ..Default::default()
        }),
        time: TimeRange::at(observed_at),
        confidence: clamp_confidence(confidence),
        source: SOURCE.to_string(),
        properties,
        cell_key: String::new(),
    }))
}
