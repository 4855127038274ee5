//! Pull-based upstream providers. Each source knows how to fetch raw
//! records for a bounding box and how to unify its own payload shape; the
//! engine depends on nothing else about the transport.
//!
//! All calls carry explicit timeouts and fail soft: a timeout or non-2xx
//! response surfaces as a [`ProviderError`] that the engine degrades to
//! "no data from this provider", never a caller-visible failure on its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProvidersConfig;
use crate::entity::EntityType;
use crate::grid::Viewport;
use crate::unify::{self, UnifyBatch};


#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0} is not configured")]
    NotConfigured(&'static str),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One pull-based upstream. Implementations are cheap handles over a shared
/// HTTP client.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Stable identifier; doubles as the cache-key source scope.
    fn id(&self) -> &'static str;

    /// Entity categories this source can produce, for query-time filtering.
    fn entity_types(&self) -> &'static [EntityType];

    /// False when a credential or endpoint the source needs is absent; the
    /// engine then reports it unavailable without retrying.
    fn is_configured(&self) -> bool {
        true
    }

    /// Fetch provider-native records covering the viewport.
    async fn fetch(&self, viewport: &Viewport) -> Result<Value, ProviderError>;

    /// Unify this source's payload shape.
    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch;
}

/// Shared HTTP plumbing for every pull source.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(config: &ProvidersConfig) -> Self {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crep/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<Value, ProviderError> {
        let mut request = self.client.get(url).query(query);
        if let Some((user, password)) = basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Transport(error)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| ProviderError::Malformed(error.to_string()))
    }
}

fn bounds_param(value: f64) -> String {
    // Round so near-identical viewports produce identical upstream queries
    format!("{value:.4}")
}

pub struct OpenSkySource {
    client: ProviderClient,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

#[async_trait]
impl RecordSource for OpenSkySource {
    fn id(&self) -> &'static str {
        "opensky"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::Aircraft]
    }

    async fn fetch(&self, viewport: &Viewport) -> Result<Value, ProviderError> {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            // Anonymous access is supported, just rate-limited harder
            _ => None,
        };
        self.client
            .get_json(
                &format!("{}/states/all", self.base_url),
                &[
                    ("lamin", bounds_param(viewport.south)),
                    ("lomin", bounds_param(viewport.west)),
                    ("lamax", bounds_param(viewport.north)),
                    ("lomax", bounds_param(viewport.east)),
                ],
                auth,
            )
            .await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::opensky::unify_states(payload, received_at)
    }
}

pub struct CatalogSource {
    client: ProviderClient,
    base_url: String,
}

#[async_trait]
impl RecordSource for CatalogSource {
    fn id(&self) -> &'static str {
        "orbital-catalog"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::Satellite]
    }

    async fn fetch(&self, _viewport: &Viewport) -> Result<Value, ProviderError> {
        // Orbital objects move too fast for a bbox query to be useful; the
        // catalog is fetched whole and filtered downstream
        self.client
            .get_json(
                &format!("{}/objects", self.base_url),
                &[("limit", "5000".to_string())],
                None,
            )
            .await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::satellites::unify_objects(payload, received_at)
    }
}

pub struct INaturalistSource {
    client: ProviderClient,
    base_url: String,
}

#[async_trait]
impl RecordSource for INaturalistSource {
    fn id(&self) -> &'static str {
        "inaturalist"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::BiologicalObservation, EntityType::Wildlife]
    }

    async fn fetch(&self, viewport: &Viewport) -> Result<Value, ProviderError> {
        self.client
            .get_json(
                &format!("{}/observations", self.base_url),
                &[
                    ("nelat", bounds_param(viewport.north)),
                    ("nelng", bounds_param(viewport.east)),
                    ("swlat", bounds_param(viewport.south)),
                    ("swlng", bounds_param(viewport.west)),
                    ("per_page", "200".to_string()),
                    ("order_by", "observed_on".to_string()),
                    ("geo", "true".to_string()),
                ],
                None,
            )
            .await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::inaturalist::unify_observations(payload, received_at)
    }
}

pub struct QuakeSource {
    client: ProviderClient,
    feed_url: String,
}

#[async_trait]
impl RecordSource for QuakeSource {
    fn id(&self) -> &'static str {
        "usgs-quakes"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::Seismic]
    }

    async fn fetch(&self, _viewport: &Viewport) -> Result<Value, ProviderError> {
        // Summary feed is global and small; filtered downstream
        self.client.get_json(&self.feed_url, &[], None).await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::hazards::unify_quakes(payload, received_at)
    }
}

pub struct WeatherSource {
    client: ProviderClient,
    alerts_url: String,
}

#[async_trait]
impl RecordSource for WeatherSource {
    fn id(&self) -> &'static str {
        "weather-alerts"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::Weather]
    }

    async fn fetch(&self, _viewport: &Viewport) -> Result<Value, ProviderError> {
        self.client
            .get_json(&self.alerts_url, &[("status", "actual".to_string())], None)
            .await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::hazards::unify_weather_alerts(payload, received_at)
    }
}

pub struct DeviceSource {
    client: ProviderClient,
    gateway_url: Option<String>,
}

#[async_trait]
impl RecordSource for DeviceSource {
    fn id(&self) -> &'static str {
        "field-devices"
    }

    fn entity_types(&self) -> &'static [EntityType] {
        &[EntityType::Device]
    }

    fn is_configured(&self) -> bool {
        self.gateway_url.is_some()
    }

    async fn fetch(&self, _viewport: &Viewport) -> Result<Value, ProviderError> {
        let url = self
            .gateway_url
            .as_deref()
            .ok_or(ProviderError::NotConfigured("field-devices"))?;
        self.client
            .get_json(&format!("{url}/devices"), &[], None)
            .await
    }

    fn unify(&self, payload: &Value, received_at: DateTime<Utc>) -> UnifyBatch {
        unify::devices::unify_devices(payload, received_at)
    }
}

/// Build the full pull-provider set from configuration.
pub fn build_sources(config: &ProvidersConfig) -> Vec<Arc<dyn RecordSource>> {
    let client = ProviderClient::new(config);
    vec![
        Arc::new(OpenSkySource {
            client: client.clone(),
            base_url: config.opensky_url.clone(),
            username: config.opensky_username.clone(),
            password: config.opensky_password.clone(),
        }),
        Arc::new(CatalogSource {
            client: client.clone(),
            base_url: config.catalog_url.clone(),
        }),
        Arc::new(INaturalistSource {
            client: client.clone(),
            base_url: config.inaturalist_url.clone(),
        }),
        Arc::new(QuakeSource {
            client: client.clone(),
            feed_url: config.quake_feed_url.clone(),
        }),
        Arc::new(WeatherSource {
            client: client.clone(),
            alerts_url: config.weather_alerts_url.clone(),
        }),
        Arc::new(DeviceSource {
            client,
            gateway_url: config.device_gateway_url.clone(),
        }),
    ]
}
