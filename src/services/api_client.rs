use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use url::Url;

use crate::errors::{message_from_body, ApiError};

/// Default request timeout, after which a request counts as failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport seam between the query layer and the forecast backend.
///
/// Paths are given as unencoded segments relative to the API base URL; an
/// empty final segment produces a trailing slash.
#[async_trait]
pub trait ForecastApi: Send + Sync {
    async fn get(&self, path: &[&str], query: &[(String, String)]) -> Result<Value, ApiError>;

    async fn post(&self, path: &[&str], body: &Value) -> Result<Value, ApiError>;
}

/// `ForecastApi` over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpForecastApi {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpForecastApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Validation(format!("invalid API base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Validation(format!(
                "API base URL {} cannot carry paths",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url_for(&self, path: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        url
    }

    fn classify(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.timeout.as_secs())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    async fn read(&self, response: Response) -> Result<Value, ApiError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), message_from_body(&body)));
        }
        serde_json::from_str(&body).map_err(ApiError::from)
    }
}

#[async_trait]
impl ForecastApi for HttpForecastApi {
    #[instrument(skip(self, query), fields(path = %path.join("/")))]
    async fn get(&self, path: &[&str], query: &[(String, String)]) -> Result<Value, ApiError> {
        let url = self.url_for(path);
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        debug!(status = response.status().as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "GET finished");
        self.read(response).await
    }

    #[instrument(skip(self, body), fields(path = %path.join("/")))]
    async fn post(&self, path: &[&str], body: &Value) -> Result<Value, ApiError> {
        let url = self.url_for(path);
        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        debug!(status = response.status().as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "POST finished");
        self.read(response).await
    }
}
