use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifetime counters for the aggregation engine. Cheap to clone; all
/// counters are shared atomics updated with relaxed ordering (monitoring
/// data, no synchronization role).
#[derive(Clone, Default)]
pub struct MetricsTracker {
    entities_ingested: Arc<AtomicU64>,
    records_dropped: Arc<AtomicU64>,
    provider_failures: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
    cache_stale_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
    stream_reconnects: Arc<AtomicU64>,
}

/// Point-in-time snapshot for the health endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub entities_ingested: u64,
    pub records_dropped: u64,
    pub provider_failures: u64,
    pub cache_hits: u64,
    pub cache_stale_hits: u64,
    pub cache_misses: u64,
    pub stream_reconnects: u64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingested(&self, count: u64) {
        self.entities_ingested.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.records_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_stale_hit(&self) {
        self.cache_stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.stream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entities_ingested: self.entities_ingested.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_stale_hits: self.cache_stale_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stream_reconnects: self.stream_reconnects.load(Ordering::Relaxed),
        }
    }
}
