use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::cache::{scope, QueryCache, QueryKey, QueryStatus};
use crate::errors::ApiError;
use crate::middleware_helpers::retry::{with_retry, ApiRetryPolicy, RetryConfig};
use crate::models::{
    DimensionMetadata, FilterDimension, ForecastResponse, ForecastSummary, HealthStatus,
    UniqueValues,
};
use crate::queries::filter::{ChunkedFilterRequest, DateRange, FilterState, MAX_PAGE_SIZE};
use crate::services::api_client::ForecastApi;

/// How long each kind of response is served from cache before revalidating.
#[derive(Debug, Clone)]
pub struct Freshness {
    pub records: Duration,
    pub summary: Duration,
    /// Distinct dimension values barely change.
    pub dimensions: Duration,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            records: Duration::from_secs(300),
            summary: Duration::from_secs(300),
            dimensions: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
enum Request {
    Get {
        path: Vec<String>,
        query: Vec<(String, String)>,
    },
    Post {
        path: Vec<String>,
        body: Value,
    },
}

impl Request {
    fn get(path: &[&str], query: Vec<(String, String)>) -> Self {
        Request::Get {
            path: path.iter().map(|s| s.to_string()).collect(),
            query,
        }
    }

    async fn send(&self, api: &dyn ForecastApi) -> Result<Value, ApiError> {
        match self {
            Request::Get { path, query } => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                api.get(&path, query).await
            }
            Request::Post { path, body } => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                api.post(&path, body).await
            }
        }
    }
}

/// Query layer over the forecast API: every read goes through the shared
/// [`QueryCache`], so identical requests are deduplicated and served
/// stale-while-revalidate, and each network call is retried per the
/// [`RetryConfig`].
#[derive(Clone)]
pub struct ForecastService {
    api: Arc<dyn ForecastApi>,
    cache: QueryCache,
    retry: RetryConfig,
    freshness: Freshness,
}

impl ForecastService {
    pub fn new(api: Arc<dyn ForecastApi>, cache: QueryCache) -> Self {
        Self {
            api,
            cache,
            retry: RetryConfig::default(),
            freshness: Freshness::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_freshness(mut self, freshness: Freshness) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// A payload that does not decode as `T` fails the request, so it is
    /// committed as an error instead of a fresh value.
    fn fetcher<T>(
        &self,
        request: Request,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, ApiError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let api = self.api.clone();
        let retry = self.retry.clone();
        move || {
            async move {
                let value = with_retry(&retry, ApiRetryPolicy, || request.send(&*api)).await?;
                let _: T = decode(&value)?;
                Ok(value)
            }
            .boxed()
        }
    }

    async fn query<T>(
        &self,
        key: QueryKey,
        stale_after: Duration,
        request: Request,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let value = self
            .cache
            .fetch(&key, stale_after, self.fetcher::<T>(request))
            .await?;
        decode(&value)
    }

    pub fn forecasts_key(filter: &FilterState) -> QueryKey {
        QueryKey::new(scope::FORECASTS).raw(&filter.cache_key())
    }

    /// `GET /forecast/` for one page of records matching `filter`.
    #[instrument(skip(self, filter), fields(page = filter.page))]
    pub async fn forecasts(&self, filter: &FilterState) -> Result<ForecastResponse, ApiError> {
        filter.validate()?;
        let request = Request::get(&["forecast", ""], filter.to_query_pairs());
        self.query(Self::forecasts_key(filter), self.freshness.records, request)
            .await
    }

    /// Bypasses freshness and supersedes any request in flight. Backs the
    /// retry control shown after a failed load.
    #[instrument(skip(self, filter))]
    pub async fn refetch_forecasts(&self, filter: &FilterState) -> Result<ForecastResponse, ApiError> {
        filter.validate()?;
        let request = Request::get(&["forecast", ""], filter.to_query_pairs());
        let value = self
            .cache
            .refetch(
                &Self::forecasts_key(filter),
                self.freshness.records,
                self.fetcher::<ForecastResponse>(request),
            )
            .await?;
        decode(&value)
    }

    pub fn forecasts_status(&self, filter: &FilterState) -> QueryStatus {
        self.cache.status(&Self::forecasts_key(filter))
    }

    /// Every record of one brick, for the weekly pivot view.
    #[instrument(skip(self, date_range))]
    pub async fn forecasts_for_brick(
        &self,
        brick: &str,
        date_range: Option<DateRange>,
    ) -> Result<ForecastResponse, ApiError> {
        let filter = FilterState::for_brick(brick, date_range).with_page(1, MAX_PAGE_SIZE);
        filter.validate()?;
        let key = QueryKey::new(scope::BRICK_FORECASTS).raw(&filter.cache_key());
        let request = Request::get(&["forecast", ""], filter.to_query_pairs());
        self.query(key, self.freshness.records, request).await
    }

    /// `GET /forecast/summary`. Pagination does not affect the result and is
    /// left out of the cache key.
    #[instrument(skip(self, filter))]
    pub async fn summary(&self, filter: &FilterState) -> Result<ForecastSummary, ApiError> {
        filter.validate()?;
        let unpaged = filter.clone().with_page(1, crate::queries::filter::DEFAULT_PAGE_SIZE);
        let key = QueryKey::new(scope::SUMMARY).raw(&unpaged.cache_key());
        let request = Request::get(&["forecast", "summary"], filter.filter_pairs());
        self.query(key, self.freshness.summary, request).await
    }

    #[instrument(skip(self))]
    pub async fn unique_values(&self, column: FilterDimension) -> Result<UniqueValues, ApiError> {
        let key = QueryKey::new(scope::UNIQUE_VALUES).param(&column);
        let request = Request::get(&["forecast", "unique-values", column.as_ref()], Vec::new());
        self.query(key, self.freshness.dimensions, request).await
    }

    #[instrument(skip(self))]
    pub async fn metadata(&self) -> Result<DimensionMetadata, ApiError> {
        let key = QueryKey::new(scope::METADATA);
        let request = Request::get(&["forecast", "metadata"], Vec::new());
        self.query(key, self.freshness.dimensions, request).await
    }

    /// Liveness check. Always hits the network and supersedes any check
    /// still in flight.
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let key = QueryKey::new(scope::HEALTH);
        let request = Request::get(&["forecast", "health"], Vec::new());
        let value = self
            .cache
            .refetch(&key, Duration::ZERO, self.fetcher::<HealthStatus>(request))
            .await?;
        decode(&value)
    }

    /// `POST /forecast/chunked-filter`
    #[instrument(skip(self, request))]
    pub async fn chunked_filter(
        &self,
        request: &ChunkedFilterRequest,
    ) -> Result<ForecastResponse, ApiError> {
        request.filters.validate()?;
        let normalized = request.normalized();
        let key = QueryKey::new(scope::CHUNKED_FILTER).param(&normalized);
        let body = serde_json::to_value(&normalized)?;
        let request = Request::Post {
            path: vec!["forecast".to_string(), "chunked-filter".to_string()],
            body,
        };
        self.query(key, self.freshness.records, request).await
    }

    /// `GET /forecast/chunked-filter/{filterType}/{value}`
    #[instrument(skip(self))]
    pub async fn chunked_filter_by(
        &self,
        dimension: FilterDimension,
        value: &str,
    ) -> Result<ForecastResponse, ApiError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ApiError::Validation(format!("{} filter value is empty", dimension)));
        }
        let key = QueryKey::new(scope::CHUNKED_FILTER)
            .param(&dimension)
            .param(value);
        let request = Request::get(
            &["forecast", "chunked-filter", dimension.as_ref(), value],
            Vec::new(),
        );
        self.query(key, self.freshness.records, request).await
    }

    /// Marks every record-derived query stale; dimension values are kept.
    pub fn invalidate_forecasts(&self) -> usize {
        let count = self.cache.invalidate_prefix(scope::FORECASTS)
            + self.cache.invalidate_prefix(scope::SUMMARY)
            + self.cache.invalidate_prefix(scope::CHUNKED_FILTER);
        info!(count, "invalidated forecast queries");
        count
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ApiError> {
    T::deserialize(value).map_err(ApiError::from)
}
