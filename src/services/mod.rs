// Forecast backend access
pub mod api_client;
pub mod forecasting;

pub use api_client::{ForecastApi, HttpForecastApi, DEFAULT_TIMEOUT};
pub use forecasting::{ForecastService, Freshness};
