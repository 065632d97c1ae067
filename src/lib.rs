//! Demand Forecast Library
//!
//! Query layer for a retail demand-forecast API: cached and deduplicated
//! reads with stale-while-revalidate and retry, filter and search
//! composition, and the weekly pivot built from forecast records.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod middleware_helpers;
pub mod models;
pub mod queries;
pub mod reports;
pub mod services;

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::ForecastRecord;
use crate::queries::filter::{FilterState, MAX_PAGE_SIZE};
use crate::queries::search::{RecordPredicate, SearchFields};
use crate::reports::pivot::{build_pivot, Pivot, PivotOptions};
use crate::services::{ForecastApi, ForecastService, HttpForecastApi};

/// Upper bound on pages read for one pivot.
pub const MAX_RECORD_PAGES: u64 = 100;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub forecasts: ForecastService,
    pub search_fields: SearchFields,
    pub pivot_options: PivotOptions,
}

impl AppState {
    /// Wires the HTTP transport, cache and service from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, ApiError> {
        let api = HttpForecastApi::new(&config.api_base_url, config.request_timeout())?;
        info!(base_url = %api.base_url(), "forecast API client ready");
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Same as [`AppState::from_config`] over any transport.
    pub fn with_api(config: AppConfig, api: Arc<dyn ForecastApi>) -> Self {
        let cache = QueryCache::new(config.cache.to_cache_config());
        let forecasts = ForecastService::new(api, cache)
            .with_retry(config.retry.to_retry_config())
            .with_freshness(config.cache.freshness());
        Self {
            search_fields: config.pivot.search_fields(),
            pivot_options: config.pivot.options(),
            config,
            forecasts,
        }
    }

    /// Starts periodic eviction of idle cache entries.
    pub fn spawn_cache_janitor(&self) -> JoinHandle<()> {
        self.forecasts
            .cache()
            .spawn_janitor(self.config.cache.cleanup_interval())
    }

    /// Fetches every page of records for `filter`, `MAX_PAGE_SIZE` at a
    /// time, and keeps those matching every active filter locally.
    pub async fn matching_records(
        &self,
        filter: &FilterState,
    ) -> Result<Vec<ForecastRecord>, ApiError> {
        let predicate = RecordPredicate::from_filter(filter, &self.search_fields);
        let mut records = Vec::new();
        let mut fetched = 0usize;

        for page in 1..=MAX_RECORD_PAGES {
            let request = filter.clone().with_page(page, MAX_PAGE_SIZE);
            let response = self.forecasts.forecasts(&request).await?;
            fetched += response.data.len();
            records.extend(predicate.apply(&response.data).into_iter().cloned());

            if !response.has_next {
                break;
            }
            if response.data.is_empty() {
                warn!(page, "empty page claims more records, stopping");
                break;
            }
            if page == MAX_RECORD_PAGES {
                warn!(
                    pages = MAX_RECORD_PAGES,
                    total_records = response.total_records,
                    "record limit reached, later pages are left out"
                );
            }
        }

        debug!(fetched, kept = records.len(), "applied client-side filters");
        Ok(records)
    }

    /// Weekly pivot of the records matching `filter`, ending with the week
    /// of `reference`.
    pub async fn pivot(
        &self,
        filter: &FilterState,
        reference: NaiveDate,
        options: &PivotOptions,
    ) -> Result<Pivot, ApiError> {
        let records = self.matching_records(filter).await?;
        Ok(build_pivot(&records, reference, options))
    }
}
