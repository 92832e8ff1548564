use crate::config::ApiConfig;
use crate::event::{Sample, DISTANCE, TEMPERATURE};
use crate::state::EntitySnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Pull-based source of snapshots and history.
///
/// Injected into the engine; implementations must be safe to share across
/// tasks.
#[async_trait]
pub trait HistoryClient: Send + Sync {
    /// Full list of current entity attributes
    async fn fetch_snapshot(&self) -> Result<Vec<EntitySnapshot>>;

    /// Full history for one entity, oldest first
    async fn fetch_history(&self, entity_id: &str) -> Result<Vec<Sample>>;
}

/// One animal as returned by `GET /api/cattle`
#[derive(Debug, Clone, Deserialize)]
pub struct CattleRecord {
    pub id: String,
    pub temperature: f64,
    pub distance: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl From<CattleRecord> for EntitySnapshot {
    fn from(record: CattleRecord) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(TEMPERATURE.to_string(), record.temperature);
        attributes.insert(DISTANCE.to_string(), record.distance);
        Self {
            id: record.id,
            attributes,
            last_updated: record.last_updated,
        }
    }
}

/// One history point as returned by `GET /api/cattle/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct DataPoint {
    pub timestamp: String,
    pub temperature: f64,
    pub distance: f64,
}

impl From<DataPoint> for Sample {
    fn from(point: DataPoint) -> Self {
        Sample::new(point.timestamp)
            .with_value(TEMPERATURE, point.temperature)
            .with_value(DISTANCE, point.distance)
    }
}

/// Non-success HTTP status from the history API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatusError {
    pub status: StatusCode,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "history API returned status {}", self.status)
    }
}

impl std::error::Error for HttpStatusError {}

/// Whether a fetch error is worth retrying.
///
/// Client errors (4xx other than 408/429) are permanent; network, timeout,
/// server and decode errors are treated as transient.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<HttpStatusError>() {
        Some(HttpStatusError { status }) if status.is_client_error() => {
            *status == StatusCode::REQUEST_TIMEOUT || *status == StatusCode::TOO_MANY_REQUESTS
        }
        _ => true,
    }
}

/// HTTP client for the cattle history/list API
pub struct HttpHistoryClient {
    http_client: Client,
    base_url: String,
}

impl HttpHistoryClient {
    /// Create a client from configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("herdwatch/0.1")
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http_client, config.base_url.clone()))
    }

    /// Create a client with a custom base URL (for testing with a mock server)
    pub fn with_base_url(base_url: String) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    fn with_client(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching from history API");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::Error::new(HttpStatusError { status }))
                .with_context(|| format!("Request to {} failed", url));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl HistoryClient for HttpHistoryClient {
    async fn fetch_snapshot(&self) -> Result<Vec<EntitySnapshot>> {
        let url = format!("{}/api/cattle", self.base_url);
        let records: Vec<CattleRecord> = self.get_json(&url).await?;
        Ok(records.into_iter().map(EntitySnapshot::from).collect())
    }

    async fn fetch_history(&self, entity_id: &str) -> Result<Vec<Sample>> {
        let url = format!(
            "{}/api/cattle/{}",
            self.base_url,
            urlencoding::encode(entity_id)
        );
        let points: Vec<DataPoint> = self.get_json(&url).await?;
        Ok(points.into_iter().map(Sample::from).collect())
    }
}
