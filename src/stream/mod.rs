//! Persistent push-based ingestion: one live AIS websocket session per
//! process, continuously unifying position reports into a shared in-memory
//! buffer that request handlers read. Requests never drive the connection.
//!
//! Reconnects follow exponential backoff (`d0, 2·d0, 4·d0, … ≤ dMax`, reset
//! to `d0` on a successful reconnect) with a little jitter so restarted
//! fleets do not reconnect in lockstep. A provider with no API key never
//! starts a session; reads report unavailable instead of retrying forever.

use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::config::{ProvidersConfig, StreamConfig};
use crate::entity::UnifiedEntity;
use crate::grid::Viewport;
use crate::metrics::MetricsTracker;
use crate::unify::aisstream;


/// Exponential backoff schedule. `next()` yields the current delay and
/// doubles it up to the cap; `reset()` returns to the base delay.
#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub(crate) fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Mutable session state, guarded by a single mutex. Never shared as an
/// ambient global: the connector owns it and serializes access.
#[derive(Debug, Default)]
struct StreamSession {
    /// Background task spawned (set once, lives for the process lifetime).
    started: bool,
    /// Websocket currently connected.
    running: bool,
    /// Delay the next reconnect will wait, mirrored from the backoff for
    /// observability.
    reconnect_delay: Duration,
}

/// Result of reading the stream buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamRead {
    /// Provider not configured (no credentials); the session never starts.
    Unavailable,
    Entities(Vec<UnifiedEntity>),
}

pub struct StreamConnector {
    buffer: Arc<DashMap<String, UnifiedEntity>>,
    session: Mutex<StreamSession>,
    /// Flips to true once the first batch lands; cold-start reads wait on it.
    has_data_tx: watch::Sender<bool>,
    stream_config: StreamConfig,
    endpoint: String,
    api_key: Option<String>,
    metrics: MetricsTracker,
}

impl StreamConnector {
    pub fn new(
        stream_config: StreamConfig,
        providers: &ProvidersConfig,
        metrics: MetricsTracker,
    ) -> Self {
        let (has_data_tx, _) = watch::channel(false);
        Self {
            buffer: Arc::new(DashMap::new()),
            session: Mutex::new(StreamSession {
                reconnect_delay: stream_config.base_reconnect_delay(),
                ..Default::default()
            }),
            has_data_tx,
            endpoint: providers.aisstream_url.clone(),
            api_key: providers.aisstream_api_key.clone(),
            stream_config,
            metrics,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().unwrap().running
    }

    /// Lazily start the background session on first access. Idempotent; at
    /// most one session task per process.
    pub fn ensure_started(self: &Arc<Self>) {
        if !self.is_configured() {
            return;
        }
        let mut session = self.session.lock().unwrap();
        if session.started {
            return;
        }
        session.started = true;
        drop(session);

        let connector = Arc::clone(self);
        tokio::spawn(async move {
            connector.run_loop().await;
        });
        info!("Stream connector session started");
    }

    /// Read buffered entities for a viewport. On a cold start this waits up
    /// to `init_wait` for the first batch so early requests are not
    /// spuriously empty; it never waits longer regardless of provider
    /// latency.
    pub async fn read(self: &Arc<Self>, viewport: &Viewport) -> StreamRead {
        if !self.is_configured() {
            return StreamRead::Unavailable;
        }
        self.ensure_started();
        self.wait_cold_start().await;
        StreamRead::Entities(self.collect(viewport))
    }

    pub(crate) async fn wait_cold_start(&self) {
        if self.buffer.is_empty() {
            let mut rx = self.has_data_tx.subscribe();
            // Timeout is the policy here, not a failure
            let _ = tokio::time::timeout(
                self.stream_config.init_wait(),
                rx.wait_for(|&has_data| has_data),
            )
            .await;
        }
    }

    pub(crate) fn collect(&self, viewport: &Viewport) -> Vec<UnifiedEntity> {
        let mut entities: Vec<UnifiedEntity> = self
            .buffer
            .iter()
            .filter(|entry| viewport.contains(&entry.value().geometry))
            .map(|entry| entry.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; sort for deterministic output
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }

    /// Unify one raw websocket frame and upsert into the buffer, keeping
    /// whichever position is newer.
    pub(crate) fn ingest_text(&self, raw: &str) {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                self.metrics.record_dropped(1);
                return;
            }
        };

        let is_position =
            value.get("MessageType").and_then(serde_json::Value::as_str) == Some("PositionReport");
        match aisstream::unify_message(&value, Utc::now()) {
            Some(entity) => self.upsert(entity),
            None if is_position => self.metrics.record_dropped(1),
            None => {}
        }
    }

    pub(crate) fn upsert(&self, entity: UnifiedEntity) {
        let stale = self
            .buffer
            .get(&entity.id)
            .map(|existing| existing.time.observed_at > entity.time.observed_at)
            .unwrap_or(false);
        if stale {
            return;
        }
        self.buffer.insert(entity.id.clone(), entity);
        self.metrics.record_ingested(1);
        if !*self.has_data_tx.borrow() {
            let _ = self.has_data_tx.send(true);
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut backoff = Backoff::new(
            self.stream_config.base_reconnect_delay(),
            self.stream_config.max_reconnect_delay(),
        );

        loop {
            match self.run_session(&mut backoff).await {
                Ok(()) => info!("Stream session closed by upstream"),
                Err(error) => error!(%error, "Stream session failed"),
            }

            let delay = backoff.next();
            {
                let mut session = self.session.lock().unwrap();
                session.running = false;
                session.reconnect_delay = delay;
            }
            self.metrics.record_reconnect();

            // Jitter up to 10% so fleets do not thunder in lockstep
            let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
            warn!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::time::sleep(delay + jitter).await;
        }
    }

    async fn run_session(&self, backoff: &mut Backoff) -> anyhow::Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("stream provider not configured"))?;

        let (ws, _) = connect_async(&self.endpoint).await?;
        let (mut write, mut read) = ws.split();

        // Broadest scope the provider supports: one global subscription
        // serves every viewport
        let subscription = json!({
            "APIKey": api_key,
            "BoundingBoxes": [[[-90.0, -180.0], [90.0, 180.0]]],
        });
        write.send(Message::Text(subscription.to_string())).await?;

        // Connected: mark running and reset the backoff schedule
        {
            let mut session = self.session.lock().unwrap();
            session.running = true;
            session.reconnect_delay = self.stream_config.base_reconnect_delay();
        }
        backoff.reset();
        info!(endpoint = %self.endpoint, "Stream connected");

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => self.ingest_text(&text),
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
