//! Schema unification: one pure, total mapping function per external
//! provider schema. Mappers never fail on malformed input — a record that
//! cannot be unified is dropped (and counted), not an error.
//!
//! Determinism: unifying the same raw record twice yields identical
//! [`UnifiedEntity`] values. Wall-clock time is injected by the caller as
//! `received_at`, never read ambiently.

use serde_json::Value;
use std::collections::HashMap;

use crate::entity::{cell_key, EntityState, Point, UnifiedEntity, Velocity};

pub mod aisstream;
pub mod devices;
pub mod hazards;
pub mod inaturalist;
pub mod opensky;
pub mod satellites;

#[cfg(test)]
mod tests;

/// Scalar applied to a velocity vector to derive the trail tail point:
/// `trail_end = position − velocity × TRAIL_LENGTH_FACTOR`.
pub const TRAIL_LENGTH_FACTOR: f64 = 0.001;

/// Result of unifying one provider payload: the entities that survived and
/// the count of records dropped for invalid geometry or shape.
#[derive(Debug, Default)]
pub struct UnifyBatch {
    pub entities: Vec<UnifiedEntity>,
    pub dropped: usize,
}

impl UnifyBatch {
    pub fn push(&mut self, unified: Option<UnifiedEntity>) {
        match unified {
            Some(entity) => self.entities.push(entity),
            None => self.dropped += 1,
        }
    }
}

/// Extract a finite f64 from a JSON value, accepting numbers and numeric
/// strings (several providers quote their floats).
pub(crate) fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Extract a non-empty trimmed string.
pub(crate) fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Attach velocity-implied trail state. Speed is provider-native (m/s or
/// knots converted upstream); heading is degrees clockwise from north.
pub(crate) fn kinematic_state(
    point: &Point,
    speed: Option<f64>,
    heading: Option<f64>,
    altitude: Option<f64>,
    classification: Option<String>,
) -> EntityState {
    let heading = heading
        .filter(|h| h.is_finite())
        .map(crate::entity::normalize_heading);

    let velocity = match (speed.filter(|s| s.is_finite()), heading) {
        (Some(speed), Some(heading)) => {
            let rad = heading.to_radians();
            Some(Velocity {
                x: speed * rad.sin(),
                y: speed * rad.cos(),
                z: None,
            })
        }
        _ => None,
    };

    let trail_end = velocity.map(|v| {
        [
            point.longitude() - v.x * TRAIL_LENGTH_FACTOR,
            point.latitude() - v.y * TRAIL_LENGTH_FACTOR,
        ]
    });

    EntityState {
        velocity,
        heading,
        altitude: altitude.filter(|a| a.is_finite()),
        classification,
        trail_end,
    }
}

/// Shared tail of every mapper: stamp the spatial index key.
pub(crate) fn finish(mut entity: UnifiedEntity) -> UnifiedEntity {
    entity.cell_key = cell_key(&entity.geometry);
    entity
}

/// Copy selected provider fields into the open properties bag, skipping
/// nulls so absent fields stay absent.
pub(crate) fn collect_properties(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Deduplicate by `(source, id)`. The record with the newer `observed_at`
/// wins; first-seen output order is preserved so the result is deterministic
/// under permutation-stable input.
pub fn dedup_entities(entities: Vec<UnifiedEntity>) -> (Vec<UnifiedEntity>, usize) {
    let mut order: Vec<UnifiedEntity> = Vec::with_capacity(entities.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entities.len());
    let mut duplicates = 0;

    for entity in entities {
        match index.get(&entity.global_id()) {
            Some(&at) => {
                duplicates += 1;
                if entity.time.observed_at > order[at].time.observed_at {
                    order[at] = entity;
                }
            }
            None => {
                index.insert(entity.global_id(), order.len());
                order.push(entity);
            }
        }
    }

    (order, duplicates)
}
