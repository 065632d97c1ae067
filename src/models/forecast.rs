use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

/// One (site, product hierarchy node, week) forecast observation as
/// returned by `GET /forecast/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    /// Week start. `None` when the backend sent something unparseable.
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub forecast_week: Option<NaiveDate>,
    pub site_id: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub mh_segment: Option<String>,
    #[serde(default)]
    pub mh_family: Option<String>,
    #[serde(default)]
    pub mh_class: Option<String>,
    #[serde(default)]
    pub mh_brick: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub predicted_qty: f64,
    #[serde(default)]
    pub actual_qty: Option<f64>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub forecast_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ForecastRecord {
    pub fn new(site_id: impl Into<String>, forecast_week: NaiveDate, predicted_qty: f64) -> Self {
        Self {
            forecast_week: Some(forecast_week),
            site_id: site_id.into(),
            brand: None,
            mh_segment: None,
            mh_family: None,
            mh_class: None,
            mh_brick: None,
            product_id: None,
            predicted_qty,
            actual_qty: None,
            model_used: None,
            forecast_run_id: None,
            zone: None,
            state: None,
            city: None,
            format: None,
        }
    }

    pub fn with_brick(mut self, brick: impl Into<String>) -> Self {
        self.mh_brick = Some(brick.into());
        self
    }

    /// Forecast accuracy in percent once the actual quantity is known.
    pub fn accuracy_pct(&self) -> Option<f64> {
        let actual = self.actual_qty?;
        if actual == 0.0 {
            return None;
        }
        Some((1.0 - (self.predicted_qty - actual).abs() / actual) * 100.0)
    }
}

/// Page of forecast records. Field names follow the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub data: Vec<ForecastRecord>,
    #[serde(default)]
    pub total_records: u64,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub has_next: bool,
}

fn default_page() -> u64 {
    1
}

impl ForecastResponse {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            total_records: 0,
            page: 1,
            page_size: 0,
            has_next: false,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return if self.total_records == 0 { 0 } else { 1 };
        }
        self.total_records.div_ceil(self.page_size)
    }
}

/// Aggregates from `GET /forecast/summary`. Every field is optional so a
/// partial payload still decodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub total_predicted_qty: Option<f64>,
    #[serde(default)]
    pub total_actual_qty: Option<f64>,
    #[serde(default)]
    pub avg_predicted_qty: Option<f64>,
    #[serde(default)]
    pub unique_sites: Option<u64>,
    #[serde(default)]
    pub unique_bricks: Option<u64>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub min_week: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub max_week: Option<NaiveDate>,
}

/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and naive `YYYY-MM-DDTHH:MM:SS`.
/// Anything else becomes `None`.
pub(crate) mod lenient_date {
    use super::*;
    use serde_json::Value;

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.date_naive());
        }
        raw.get(..10)
            .filter(|_| raw.as_bytes().get(10) == Some(&b'T') || raw.as_bytes().get(10) == Some(&b' '))
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => parse(&s),
            _ => None,
        })
    }
}
