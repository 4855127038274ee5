//! Viewport cache fronting expensive or rate-limited upstream fetches.
//!
//! Policy per key:
//! - HIT: entry younger than the TTL — returned unchanged, `cached = true`.
//! - STALE: past the TTL but inside the stale window — the stale payload is
//!   returned immediately while a background refresh (at most one per key)
//!   replaces the entry; callers are never blocked by the refresh.
//! - MISS: past the stale window or absent — synchronous fetch.
//!
//! A process-wide minimum refetch interval per source coalesces many
//! near-simultaneous callers with slightly different keys into one upstream
//! fetch or the last known payload.
//!
//! Entries are never mutated in place: a successful fetch inserts a new
//! entry that supersedes the old one. Uses `tokio::time::Instant` so paused-
//! clock tests control expiry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::metrics::MetricsTracker;

#[cfg(test)]
mod tests;

/// Upper bound on how long a coalesced caller waits for someone else's
/// in-flight fetch before giving up.
const COALESCE_WAIT: Duration = Duration::from_secs(30);

/// One cached payload. Created on a successful fetch, superseded by a newer
/// entry on the same key, never mutated.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub data: Value,
    /// Wall-clock fetch time, surfaced to clients.
    pub timestamp: DateTime<Utc>,
    expires_at: Instant,
    stale_expires_at: Instant,
}

/// Result of a cache consultation.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub data: Value,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

enum Lookup {
    Hit(CacheEntry),
    Stale(CacheEntry),
    Miss(Option<CacheEntry>),
}

pub struct ViewportCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    /// One sender per key with a fetch in flight; waiters subscribe.
    inflight: Arc<DashMap<String, broadcast::Sender<()>>>,
    /// Last full-refresh instant per source identifier.
    last_refetch: Mutex<HashMap<String, Instant>>,
    config: CacheConfig,
    metrics: MetricsTracker,
}

impl ViewportCache {
    pub fn new(config: CacheConfig, metrics: MetricsTracker) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            last_refetch: Mutex::new(HashMap::new()),
            config,
            metrics,
        }
    }

    /// Build a stable cache key from a source identifier and normalized
    /// query parameters. Parameter order is the caller's responsibility;
    /// float parameters should be pre-rounded so near-identical viewports
    /// share a key.
    pub fn make_key(source: &str, params: &[(&str, String)]) -> String {
        let mut key = String::from(source);
        for (name, value) in params {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop an entry (used by forced-refresh requests).
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn lookup(&self, key: &str) -> Lookup {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Lookup::Hit(entry.clone()),
            Some(entry) if now < entry.stale_expires_at => Lookup::Stale(entry.clone()),
            Some(entry) => Lookup::Miss(Some(entry.clone())),
            None => Lookup::Miss(None),
        }
    }

    fn insert(&self, key: &str, data: Value) -> CacheEntry {
        let now = Instant::now();
        let entry = CacheEntry {
            data,
            timestamp: Utc::now(),
            expires_at: now + self.config.ttl(),
            stale_expires_at: now + self.config.ttl() + self.config.stale_window(),
        };
        self.entries.insert(key.to_string(), entry.clone());
        entry
    }

    /// Check-and-consume the per-source refetch budget. Returns false when
    /// a full refresh for this source ran more recently than the minimum
    /// interval.
    fn claim_source_refetch(&self, source: &str) -> bool {
        let mut last = self.last_refetch.lock().unwrap();
        let now = Instant::now();
        match last.get(source) {
            Some(&at) if now.duration_since(at) < self.config.min_refetch_interval() => false,
            _ => {
                last.insert(source.to_string(), now);
                true
            }
        }
    }

    /// Record an upstream fetch that ran outside the check-and-consume path
    /// so the interval restarts from it.
    fn stamp_source_refetch(&self, source: &str) {
        self.last_refetch
            .lock()
            .unwrap()
            .insert(source.to_string(), Instant::now());
    }

    /// Claim the in-flight slot for a key, or get a receiver on the fetch
    /// already running.
    fn claim_inflight(&self, key: &str) -> std::result::Result<(), broadcast::Receiver<()>> {
        use dashmap::mapref::entry::Entry;
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(occupied) => Err(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _) = broadcast::channel(1);
                vacant.insert(tx);
                Ok(())
            }
        }
    }

    fn release_inflight(&self, key: &str) {
        if let Some((_, tx)) = self.inflight.remove(key) {
            // No waiters is fine
            let _ = tx.send(());
        }
    }

    /// Consult the cache for `key`; on MISS run `fetch` and populate the
    /// entry. `source` scopes the minimum-refetch-interval budget.
    ///
    /// Serialization or fetch-plumbing failures never propagate as cache
    /// errors: a failed fetch with a surviving older entry degrades to that
    /// entry, and only a failure with nothing cached at all returns `Err`.
    pub async fn get_or_fetch<F, Fut>(&self, source: &str, key: &str, fetch: F) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        match self.lookup(key) {
            Lookup::Hit(entry) => {
                self.metrics.record_cache_hit();
                Ok(FetchOutcome {
                    data: entry.data,
                    cached: true,
                    timestamp: entry.timestamp,
                })
            }
            Lookup::Stale(entry) => {
                self.metrics.record_cache_stale_hit();
                self.spawn_background_refresh(source, key, fetch);
                Ok(FetchOutcome {
                    data: entry.data,
                    cached: true,
                    timestamp: entry.timestamp,
                })
            }
            Lookup::Miss(previous) => {
                self.metrics.record_cache_miss();
                self.fetch_sync(source, key, previous, fetch).await
            }
        }
    }

    /// STALE path: refresh in a detached task with its own error handling.
    /// At most one refresh per key; skipped entirely when the source's
    /// refetch budget is exhausted (the stale payload was already served).
    fn spawn_background_refresh<F, Fut>(&self, source: &str, key: &str, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if self.claim_inflight(key).is_err() {
            return;
        }
        if !self.claim_source_refetch(source) {
            self.release_inflight(key);
            return;
        }

        let key = key.to_string();
        let entries = Arc::clone(&self.entries);
        let inflight = Arc::clone(&self.inflight);
        let ttl = self.config.ttl();
        let stale_window = self.config.stale_window();
        tokio::spawn(async move {
            match fetch().await {
                Ok(data) => {
                    let now = Instant::now();
                    entries.insert(
                        key.clone(),
                        CacheEntry {
                            data,
                            timestamp: Utc::now(),
                            expires_at: now + ttl,
                            stale_expires_at: now + ttl + stale_window,
                        },
                    );
                    debug!(key = %key, "Background refresh replaced cache entry");
                }
                Err(error) => {
                    warn!(key = %key, %error, "Background refresh failed; stale entry retained");
                }
            }
            if let Some((_, tx)) = inflight.remove(&key) {
                let _ = tx.send(());
            }
        });
    }

    async fn fetch_sync<F, Fut>(
        &self,
        source: &str,
        key: &str,
        mut previous: Option<CacheEntry>,
        fetch: F,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        match self.claim_inflight(key) {
            Err(mut waiter) => {
                // Someone else is fetching this key; wait for them
                let _ = tokio::time::timeout(COALESCE_WAIT, waiter.recv()).await;
                if let Some(entry) = self.entries.get(key) {
                    return Ok(FetchOutcome {
                        data: entry.data.clone(),
                        cached: true,
                        timestamp: entry.timestamp,
                    });
                }
                anyhow::bail!("coalesced fetch for {key} produced no data")
            }
            Ok(()) => {}
        }

        // Stampede control: inside the refetch interval, serve whatever we
        // still hold rather than hit the upstream again. A key with nothing
        // cached at all must still fetch or it could never warm up; when
        // that fetch succeeds it stamps the budget so the interval restarts.
        let claimed = self.claim_source_refetch(source);
        if !claimed {
            if let Some(entry) = previous.take() {
                self.release_inflight(key);
                return Ok(FetchOutcome {
                    data: entry.data,
                    cached: true,
                    timestamp: entry.timestamp,
                });
            }
        }

        let result = fetch().await;
        let outcome = match result {
            Ok(data) => {
                if !claimed {
                    self.stamp_source_refetch(source);
                }
                let entry = self.insert(key, data);
                Ok(FetchOutcome {
                    data: entry.data,
                    cached: false,
                    timestamp: entry.timestamp,
                })
            }
            Err(error) => match previous {
                // Degrade to the expired entry rather than failing the caller
                Some(entry) => {
                    warn!(key = %key, %error, "Fetch failed; serving expired entry");
                    Ok(FetchOutcome {
                        data: entry.data,
                        cached: true,
                        timestamp: entry.timestamp,
                    })
                }
                None => Err(error),
            },
        };
        self.release_inflight(key);
        outcome
    }
}
