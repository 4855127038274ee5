//! Per-cell probability aggregation: folds point observations into smoothed
//! spatial density/risk estimates.
//!
//! Scoring is pure — a function of the cell bounds and the in-cell entity
//! set only, invariant under entity permutation and call order — because
//! cells are processed independently and may run in parallel. The shipped
//! formula is an explicitly heuristic placeholder, kept behind
//! [`ScoringStrategy`] so a validated model can replace it without touching
//! the engine.

use serde::Serialize;
use std::sync::Arc;

use crate::entity::UnifiedEntity;
use crate::grid::{CellBounds, GridCell};


/// Individual scoring terms, exposed for explainability and testing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreFactors {
    /// Temperate-band baseline derived from the cell's center latitude.
    pub latitude_baseline: f64,
    /// Saturating function of the in-cell observation count.
    pub density_term: f64,
    /// Continuous spatial term; adjacent cells get nearby values so cell
    /// edges never jump.
    pub smoothing_term: f64,
}

/// Deterministic score for one cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellScore {
    /// [0, 1]
    pub probability: f64,
    /// Observations per square degree.
    pub density: f64,
    /// [0, 1]
    pub confidence: f64,
    pub factors: ScoreFactors,
    pub observation_count: usize,
}

/// Full per-cell output row for the grid API.
#[derive(Clone, Debug, Serialize)]
pub struct CellProbability {
    pub cell_id: String,
    pub bounds: CellBounds,
    pub probability: f64,
    pub density: f64,
    pub confidence: f64,
    pub factors: ScoreFactors,
    pub observation_count: usize,
}

/// Strategy seam for the scoring formula.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, cell: &GridCell, entities: &[&UnifiedEntity]) -> CellScore;
}

/// Default heuristic scoring. The constants are placeholders, not a
/// validated scientific model.
#[derive(Clone, Debug)]
pub struct BaselineScoring {
    pub latitude_weight: f64,
    pub density_weight: f64,
    pub smoothing_weight: f64,
    /// e-folding count of the saturating density term.
    pub density_scale: f64,
}

impl Default for BaselineScoring {
    fn default() -> Self {
        Self {
            latitude_weight: 0.35,
            density_weight: 0.45,
            smoothing_weight: 0.20,
            density_scale: 4.0,
        }
    }
}

impl BaselineScoring {
    /// Peaks around the ±45° temperate bands, tapering toward the equator
    /// and the poles.
    fn latitude_baseline(lat: f64) -> f64 {
        let offset = lat.abs() - 45.0;
        0.25 + 0.65 * (-(offset * offset) / (2.0 * 18.0 * 18.0)).exp()
    }

    /// Monotonic and saturating so a handful of observations cannot
    /// dominate the score.
    fn density_term(&self, count: usize) -> f64 {
        1.0 - (-(count as f64) / self.density_scale).exp()
    }

    /// Smooth harmonic of the cell center. Deterministic, continuous in
    /// space: neighbouring cells land on nearby values.
    fn smoothing_term(lat: f64, lon: f64) -> f64 {
        0.5 + 0.25 * (lat * 0.35).sin() * (lon * 0.35).cos()
    }
}

impl ScoringStrategy for BaselineScoring {
    fn score(&self, cell: &GridCell, entities: &[&UnifiedEntity]) -> CellScore {
        let count = entities.len();
        let factors = ScoreFactors {
            latitude_baseline: Self::latitude_baseline(cell.center.lat),
            density_term: self.density_term(count),
            smoothing_term: Self::smoothing_term(cell.center.lat, cell.center.lon),
        };

        let probability = (self.latitude_weight * factors.latitude_baseline
            + self.density_weight * factors.density_term
            + self.smoothing_weight * factors.smoothing_term)
            .clamp(0.0, 1.0);

        // Order-invariant reduction: max, not a float sum
        let best_observation = entities.iter().map(|e| e.confidence).fold(0.0, f64::max);
        let confidence = (0.15 + 0.55 * (1.0 - (-(count as f64) / 6.0).exp())
            + 0.3 * best_observation)
            .clamp(0.0, 1.0);

        let area = cell.bounds.area_deg2();
        CellScore {
            probability,
            density: if area > 0.0 { count as f64 / area } else { 0.0 },
            confidence,
            factors,
            observation_count: count,
        }
    }
}

pub struct ProbabilityAggregator {
    strategy: Arc<dyn ScoringStrategy>,
}

impl ProbabilityAggregator {
    pub fn new(strategy: Arc<dyn ScoringStrategy>) -> Self {
        Self { strategy }
    }

    /// Score one cell against the entities whose coordinates fall inside
    /// its bounds.
    pub fn score_cell(&self, cell: &GridCell, entities: &[UnifiedEntity]) -> CellScore {
        let in_cell: Vec<&UnifiedEntity> = entities
            .iter()
            .filter(|entity| cell.bounds.contains(&entity.geometry))
            .collect();
        self.strategy.score(cell, &in_cell)
    }

    /// Score every cell. Cells have no data dependency on one another; the
    /// per-request cap upstream bounds the work.
    pub fn aggregate(&self, cells: &[GridCell], entities: &[UnifiedEntity]) -> Vec<CellProbability> {
        cells
            .iter()
            .map(|cell| {
                let score = self.score_cell(cell, entities);
                CellProbability {
                    cell_id: cell.id.clone(),
                    bounds: cell.bounds,
                    probability: score.probability,
                    density: score.density,
                    confidence: score.confidence,
                    factors: score.factors,
                    observation_count: score.observation_count,
                }
            })
            .collect()
    }
}

impl Default for ProbabilityAggregator {
    fn default() -> Self {
        Self::new(Arc::new(BaselineScoring::default()))
    }
}
