use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::cache::QueryCacheConfig;
use crate::middleware_helpers::retry::RetryConfig;
use crate::queries::search::{SearchField, SearchFields};
use crate::reports::pivot::{CollisionPolicy, PivotOptions, DEFAULT_WINDOW_WEEKS};
use crate::services::forecasting::Freshness;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const CONFIG_DIR: &str = "config";

/// Retry configuration for backend requests
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Attempts per request, the first one included
    #[serde(default = "default_retry_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Fixed pause between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    #[validate(range(max = 60000))]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Query cache configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Seconds raw forecast records stay fresh
    #[serde(default = "default_records_stale_secs")]
    pub records_stale_secs: u64,

    /// Seconds summaries stay fresh
    #[serde(default = "default_records_stale_secs")]
    pub summary_stale_secs: u64,

    /// Seconds dimension values and metadata stay fresh
    #[serde(default = "default_dimensions_stale_secs")]
    pub dimensions_stale_secs: u64,

    /// Seconds an unread entry survives before eviction
    #[serde(default = "default_gc_secs")]
    pub gc_secs: u64,

    /// Maximum number of cached queries
    #[serde(default = "default_cache_capacity")]
    #[validate(range(min = 1))]
    pub capacity: usize,

    /// Interval in seconds for evicting idle entries
    #[serde(default = "default_cleanup_interval")]
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            records_stale_secs: default_records_stale_secs(),
            summary_stale_secs: default_records_stale_secs(),
            dimensions_stale_secs: default_dimensions_stale_secs(),
            gc_secs: default_gc_secs(),
            capacity: default_cache_capacity(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            gc_after: Duration::from_secs(self.gc_secs),
            capacity: self.capacity,
        }
    }

    pub fn freshness(&self) -> Freshness {
        Freshness {
            records: Duration::from_secs(self.records_stale_secs),
            summary: Duration::from_secs(self.summary_stale_secs),
            dimensions: Duration::from_secs(self.dimensions_stale_secs),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Pivot table configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PivotSettings {
    /// Number of weeks shown, the current one included
    #[serde(default = "default_window_weeks")]
    #[validate(range(min = 1, max = 53))]
    pub window_weeks: usize,

    /// `last_wins` or `sum`
    #[serde(default)]
    pub collision: CollisionPolicy,

    /// Fields free-text search is matched against
    #[serde(default)]
    pub search_fields: Option<Vec<SearchField>>,
}

impl Default for PivotSettings {
    fn default() -> Self {
        Self {
            window_weeks: default_window_weeks(),
            collision: CollisionPolicy::default(),
            search_fields: None,
        }
    }
}

impl PivotSettings {
    pub fn options(&self) -> PivotOptions {
        PivotOptions {
            window_weeks: self.window_weeks,
            collision: self.collision,
        }
    }

    pub fn search_fields(&self) -> SearchFields {
        match &self.search_fields {
            Some(fields) => SearchFields::new(fields.iter().copied()),
            None => SearchFields::default(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base URL of the forecast API
    #[validate(url)]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub retry: RetrySettings,

    #[serde(default)]
    #[validate]
    pub cache: CacheSettings,

    #[serde(default)]
    #[validate]
    pub pivot: PivotSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: default_request_timeout_secs(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
            pivot: PivotSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.cache.dimensions_stale_secs < self.cache.records_stale_secs {
            let mut err = ValidationError::new("dimensions_fresher_than_records");
            err.message = Some(
                "cache.dimensions_stale_secs must not be shorter than cache.records_stale_secs"
                    .into(),
            );
            errors.add("cache", err);
        }

        if self.pivot.search_fields.as_ref().is_some_and(|f| f.is_empty()) {
            let mut err = ValidationError::new("search_fields_empty");
            err.message = Some("pivot.search_fields needs at least one field".into());
            errors.add("pivot", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs field validation and cross-field checks.
    pub fn check(&self) -> Result<(), AppConfigError> {
        self.validate()?;
        self.validate_additional_constraints()?;
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_records_stale_secs() -> u64 {
    300
}

fn default_dimensions_stale_secs() -> u64 {
    3600
}

fn default_gc_secs() -> u64 {
    1800
}

fn default_cache_capacity() -> usize {
    500
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_window_weeks() -> usize {
    DEFAULT_WINDOW_WEEKS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("demand_forecast={},forecast_dash={}", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    // Logs go to stderr so command output on stdout stays parseable.
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let builder = Config::builder()
        .set_default("api_base_url", DEFAULT_API_BASE_URL)?
        .set_default("environment", run_env.clone())?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    from_config(builder.build()?)
}

/// Deserializes and validates an already assembled configuration.
pub fn from_config(config: Config) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.check().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
