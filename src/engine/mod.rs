//! The aggregation engine: one owned service object constructed at process
//! start and injected into request handlers. Owns the viewport cache, the
//! stream connector, the pull-provider set and the probability aggregator;
//! no ambient global state anywhere.

use anyhow::anyhow;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::{CellProbability, ProbabilityAggregator};
use crate::cache::ViewportCache;
use crate::config::CrepConfig;
use crate::entity::{EntityType, UnifiedEntity};
use crate::grid::{calculate_grid_cells, mercator_lat, tile_to_bounds, CellBounds, GridCell, Viewport};
use crate::metrics::{MetricsSnapshot, MetricsTracker};
use crate::providers::RecordSource;
use crate::raster;
use crate::stream::{StreamConnector, StreamRead};
use crate::unify::dedup_entities;


/// Where a response's data ultimately came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// At least one provider was fetched fresh this request.
    Live,
    /// Every contribution came from the cache.
    Cached,
    /// Every requested provider failed or is unconfigured.
    Unavailable,
}

#[derive(Clone, Debug)]
pub struct EntityQuery {
    pub viewport: Viewport,
    /// None means all types.
    pub types: Option<HashSet<EntityType>>,
    pub limit: usize,
    /// Force-bypass the cache.
    pub refresh: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EntityQueryResult {
    pub entities: Vec<UnifiedEntity>,
    pub total: usize,
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GridProbabilityResult {
    pub viewport: Viewport,
    pub zoom_level: u8,
    pub grid_cells: usize,
    pub cell_probabilities: Vec<CellProbability>,
    pub source: ResultSource,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatus {
    pub id: &'static str,
    pub configured: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub stream_running: bool,
    pub stream_buffer: usize,
    pub cache_entries: usize,
    pub providers: Vec<ProviderStatus>,
    pub metrics: MetricsSnapshot,
}

pub struct CrepEngine {
    config: CrepConfig,
    cache: ViewportCache,
    stream: Arc<StreamConnector>,
    sources: Vec<Arc<dyn RecordSource>>,
    aggregator: ProbabilityAggregator,
    metrics: MetricsTracker,
    started_at: std::time::Instant,
}

impl CrepEngine {
    pub fn new(config: CrepConfig, sources: Vec<Arc<dyn RecordSource>>) -> Self {
        let metrics = MetricsTracker::new();
        let cache = ViewportCache::new(config.cache.clone(), metrics.clone());
        let stream = Arc::new(StreamConnector::new(
            config.stream.clone(),
            &config.providers,
            metrics.clone(),
        ));
        Self {
            config,
            cache,
            stream,
            sources,
            aggregator: ProbabilityAggregator::default(),
            metrics,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn config(&self) -> &CrepConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    fn wants(query_types: &Option<HashSet<EntityType>>, produced: &[EntityType]) -> bool {
        match query_types {
            Some(set) => produced.iter().any(|t| set.contains(t)),
            None => true,
        }
    }

    fn viewport_key(source: &str, viewport: &Viewport) -> String {
        ViewportCache::make_key(
            source,
            &[
                ("n", format!("{:.4}", viewport.north)),
                ("s", format!("{:.4}", viewport.south)),
                ("e", format!("{:.4}", viewport.east)),
                ("w", format!("{:.4}", viewport.west)),
            ],
        )
    }

    /// Fetch-and-unify one pull source through the cache. The cached value
    /// is the unified, viewport-filtered entity list, so HITs skip both the
    /// upstream and re-unification.
    async fn source_entities(
        &self,
        source: Arc<dyn RecordSource>,
        viewport: Viewport,
        refresh: bool,
    ) -> anyhow::Result<(Vec<UnifiedEntity>, bool)> {
        let key = Self::viewport_key(source.id(), &viewport);
        if refresh {
            self.cache.invalidate(&key);
        }

        let metrics = self.metrics.clone();
        let fetch_source = Arc::clone(&source);
        let outcome = self
            .cache
            .get_or_fetch(source.id(), &key, move || async move {
                let payload = fetch_source
                    .fetch(&viewport)
                    .await
                    .map_err(|error| anyhow!("{}: {error}", fetch_source.id()))?;
                let batch = fetch_source.unify(&payload, Utc::now());
                metrics.record_ingested(batch.entities.len() as u64);
                metrics.record_dropped(batch.dropped as u64);
                let in_view: Vec<UnifiedEntity> = batch
                    .entities
                    .into_iter()
                    .filter(|entity| viewport.contains(&entity.geometry))
                    .collect();
                Ok(serde_json::to_value(in_view)?)
            })
            .await?;

        // A payload this process serialized that no longer parses is a
        // cache-layer fault: treat as empty, never propagate
        let entities: Vec<UnifiedEntity> = match serde_json::from_value(outcome.data) {
            Ok(entities) => entities,
            Err(error) => {
                warn!(source = source.id(), %error, "Discarding undecodable cache entry");
                self.cache.invalidate(&key);
                Vec::new()
            }
        };
        Ok((entities, outcome.cached))
    }

    /// The entity query path: cache consultation, provider fan-out, schema
    /// unification, dedup, type filtering and the response status flags.
    pub async fn query_entities(&self, query: EntityQuery) -> EntityQueryResult {
        let mut merged: Vec<UnifiedEntity> = Vec::new();
        let mut any_live = false;
        let mut any_cached = false;
        let mut degraded: Vec<String> = Vec::new();

        let selected: Vec<Arc<dyn RecordSource>> = self
            .sources
            .iter()
            .filter(|source| Self::wants(&query.types, source.entity_types()))
            .cloned()
            .collect();

        let mut requested_any = false;
        let mut tasks = Vec::new();
        for source in selected {
            requested_any = true;
            if !source.is_configured() {
                degraded.push(format!("{} not configured", source.id()));
                continue;
            }
            let viewport = query.viewport;
            let refresh = query.refresh;
            tasks.push(async move {
                let id = source.id();
                (id, self.source_entities(source, viewport, refresh).await)
            });
        }

        for (id, result) in join_all(tasks).await {
            match result {
                Ok((entities, cached)) => {
                    if cached {
                        any_cached = true;
                    } else {
                        any_live = true;
                    }
                    merged.extend(entities);
                }
                Err(error) => {
                    self.metrics.record_provider_failure();
                    warn!(source = id, %error, "Provider degraded to empty");
                    degraded.push(error.to_string());
                }
            }
        }

        // Vessels arrive over the push stream, not a pull provider
        if Self::wants(&query.types, &[EntityType::Vessel]) {
            requested_any = true;
            match self.stream.read(&query.viewport).await {
                StreamRead::Unavailable => {
                    degraded.push("aisstream not configured".to_string());
                }
                StreamRead::Entities(entities) => {
                    any_live = true;
                    merged.extend(entities);
                }
            }
        }

        let (mut entities, duplicates) = dedup_entities(merged);
        if duplicates > 0 {
            debug!(duplicates, "Merged duplicate entities across providers");
        }

        if let Some(types) = &query.types {
            entities.retain(|entity| types.contains(&entity.entity_type));
        }

        let total = entities.len();
        entities.truncate(query.limit);

        let source = if any_live {
            ResultSource::Live
        } else if any_cached {
            ResultSource::Cached
        } else {
            ResultSource::Unavailable
        };
        let reason = (source == ResultSource::Unavailable).then(|| {
            if !requested_any {
                "no providers match the requested types".to_string()
            } else if degraded.is_empty() {
                "no providers produced data".to_string()
            } else {
                degraded.join("; ")
            }
        });

        EntityQueryResult {
            entities,
            total,
            source,
            reason,
        }
    }

    /// Observations feeding the probability surface.
    async fn observations(&self, viewport: Viewport, refresh: bool) -> (Vec<UnifiedEntity>, ResultSource) {
        let result = self
            .query_entities(EntityQuery {
                viewport,
                types: Some([EntityType::BiologicalObservation].into()),
                limit: self.config.api.max_entity_limit,
                refresh,
            })
            .await;
        (result.entities, result.source)
    }

    /// Grid probability surface for a viewport.
    pub async fn grid_probability(
        &self,
        viewport: Viewport,
        zoom_level: u8,
        refresh: bool,
    ) -> GridProbabilityResult {
        let cells = calculate_grid_cells(
            &viewport,
            zoom_level,
            self.config.grid.max_cells_per_request,
        );
        let (observations, source) = self.observations(viewport, refresh).await;
        let cell_probabilities = self.aggregator.aggregate(&cells, &observations);

        GridProbabilityResult {
            viewport,
            zoom_level,
            grid_cells: cell_probabilities.len(),
            cell_probabilities,
            source,
            timestamp: Utc::now(),
        }
    }

    /// Render one probability tile as a PNG heat overlay.
    pub async fn probability_tile(&self, zoom: u8, x: u32, y: u32) -> Vec<u8> {
        let bounds = tile_to_bounds(zoom, x, y);
        let viewport = Viewport {
            north: bounds.north,
            south: bounds.south,
            east: bounds.east,
            west: bounds.west,
        };

        let n = self.config.grid.tile_subdivision as u32;
        let mut cells = Vec::with_capacity((n * n) as usize);
        for j in 0..n {
            for i in 0..n {
                let sub = CellBounds {
                    west: bounds.west + (bounds.east - bounds.west) * i as f64 / n as f64,
                    east: bounds.west + (bounds.east - bounds.west) * (i + 1) as f64 / n as f64,
                    north: mercator_lat(zoom, y as f64 + j as f64 / n as f64),
                    south: mercator_lat(zoom, y as f64 + (j + 1) as f64 / n as f64),
                };
                cells.push(GridCell {
                    id: format!("{zoom}-{x}-{y}-{i}-{j}"),
                    center: sub.center(),
                    bounds: sub,
                });
            }
        }

        let (observations, _) = self.observations(viewport, false).await;
        let scores = self.aggregator.aggregate(&cells, &observations);
        raster::render_probability_tile(&scores, n as usize)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            uptime_seconds: self.started_at.elapsed().as_secs(),
            stream_running: self.stream.is_running(),
            stream_buffer: self.stream.buffer_len(),
            cache_entries: self.cache.entry_count(),
            providers: self
                .sources
                .iter()
                .map(|source| ProviderStatus {
                    id: source.id(),
                    configured: source.is_configured(),
                })
                .chain(std::iter::once(ProviderStatus {
                    id: "aisstream",
                    configured: self.stream.is_configured(),
                }))
                .collect(),
            metrics: self.metrics.snapshot(),
        }
    }
}
