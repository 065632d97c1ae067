// Wire models for the forecast backend
pub mod dimension;
pub mod forecast;

pub use dimension::{DimensionMetadata, FilterDimension, HealthStatus, UniqueValues};
pub use forecast::{ForecastRecord, ForecastResponse, ForecastSummary};
