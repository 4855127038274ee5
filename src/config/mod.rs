use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;


/// Complete CREP configuration. Every tunable has a serde default so a
/// partial (or absent) TOML file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrepConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl CrepConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load from the path in `CREP_CONFIG`, falling back to defaults when
    /// the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var("CREP_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Upstream provider endpoints and credentials. Credentials come from the
/// environment (never the config file); an empty credential means the
/// provider is not configured and reads report "unavailable".
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Per-call upstream timeout; providers fail soft past it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_opensky_url")]
    pub opensky_url: String,
    #[serde(default = "default_aisstream_url")]
    pub aisstream_url: String,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_inaturalist_url")]
    pub inaturalist_url: String,
    #[serde(default = "default_quake_feed_url")]
    pub quake_feed_url: String,
    #[serde(default = "default_weather_alerts_url")]
    pub weather_alerts_url: String,
    /// Optional local gateway; absent means the device provider is off.
    #[serde(default)]
    pub device_gateway_url: Option<String>,
    #[serde(default = "env_opensky_username")]
    pub opensky_username: Option<String>,
    #[serde(default = "env_opensky_password")]
    pub opensky_password: Option<String>,
    #[serde(default = "env_aisstream_key")]
    pub aisstream_api_key: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_opensky_url() -> String {
    "https://opensky-network.org/api".to_string()
}

fn default_aisstream_url() -> String {
    "wss://stream.aisstream.io/v0/stream".to_string()
}

fn default_catalog_url() -> String {
    "http://astria.tacc.utexas.edu/api".to_string()
}

fn default_inaturalist_url() -> String {
    "https://api.inaturalist.org/v1".to_string()
}

fn default_quake_feed_url() -> String {
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/all_hour.geojson".to_string()
}

fn default_weather_alerts_url() -> String {
    "https://api.weather.gov/alerts/active".to_string()
}

fn env_opensky_username() -> Option<String> {
    non_empty_env("OPENSKY_USERNAME")
}

fn env_opensky_password() -> Option<String> {
    non_empty_env("OPENSKY_PASSWORD")
}

fn env_aisstream_key() -> Option<String> {
    non_empty_env("AISSTREAM_API_KEY")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            opensky_url: default_opensky_url(),
            aisstream_url: default_aisstream_url(),
            catalog_url: default_catalog_url(),
            inaturalist_url: default_inaturalist_url(),
            quake_feed_url: default_quake_feed_url(),
            weather_alerts_url: default_weather_alerts_url(),
            device_gateway_url: None,
            opensky_username: env_opensky_username(),
            opensky_password: env_opensky_password(),
            aisstream_api_key: env_aisstream_key(),
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Viewport cache policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Hard TTL: entries younger than this are HITs.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Stale window past the TTL: entries here are served while a
    /// background refresh replaces them.
    #[serde(default = "default_stale_window_ms")]
    pub stale_window_ms: u64,
    /// Process-wide floor between full refreshes of the same source,
    /// independent of per-key TTL (stampede control).
    #[serde(default = "default_min_refetch_interval_ms")]
    pub min_refetch_interval_ms: u64,
}

fn default_ttl_ms() -> u64 {
    30_000
}

fn default_stale_window_ms() -> u64 {
    120_000
}

fn default_min_refetch_interval_ms() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            stale_window_ms: default_stale_window_ms(),
            min_refetch_interval_ms: default_min_refetch_interval_ms(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.stale_window_ms)
    }

    pub fn min_refetch_interval(&self) -> Duration {
        Duration::from_millis(self.min_refetch_interval_ms)
    }
}

/// Grid partitioning limits.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// Hard cap on cells processed per request. Cost control: uncapped
    /// iteration over fine zoom levels is a resource-exhaustion hazard.
    #[serde(default = "default_max_cells_per_request")]
    pub max_cells_per_request: usize,
    #[serde(default = "default_zoom")]
    pub default_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    /// Sub-grid resolution when rasterizing a probability tile (n×n).
    #[serde(default = "default_tile_subdivision")]
    pub tile_subdivision: u8,
}

fn default_max_cells_per_request() -> usize {
    256
}

fn default_zoom() -> u8 {
    8
}

fn default_max_zoom() -> u8 {
    14
}

fn default_tile_subdivision() -> u8 {
    8
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_cells_per_request: default_max_cells_per_request(),
            default_zoom: default_zoom(),
            max_zoom: default_max_zoom(),
            tile_subdivision: default_tile_subdivision(),
        }
    }
}

/// Stream connector reconnect policy and cold-start bound.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_base_reconnect_delay_ms")]
    pub base_reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Upper bound on how long a cold-start read waits for the first batch.
    #[serde(default = "default_init_wait_ms")]
    pub init_wait_ms: u64,
}

fn default_base_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}

fn default_init_wait_ms() -> u64 {
    5_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_reconnect_delay_ms: default_base_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            init_wait_ms: default_init_wait_ms(),
        }
    }
}

impl StreamConfig {
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }
}

/// HTTP surface limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Entities returned when the caller sets no limit.
    #[serde(default = "default_entity_limit")]
    pub default_entity_limit: usize,
    /// Named, validated cap on the caller-supplied limit.
    #[serde(default = "default_max_entity_limit")]
    pub max_entity_limit: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8600".to_string()
}

fn default_entity_limit() -> usize {
    500
}

fn default_max_entity_limit() -> usize {
    2_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_entity_limit: default_entity_limit(),
            max_entity_limit: default_max_entity_limit(),
        }
    }
}
