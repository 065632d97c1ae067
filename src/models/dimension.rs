use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Columns the backend can filter on or enumerate distinct values for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FilterDimension {
    Zone,
    State,
    City,
    SiteId,
    Format,
    Brand,
    MhSegment,
    MhFamily,
    MhClass,
    MhBrick,
}

/// `GET /forecast/unique-values/{column}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniqueValues {
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl UniqueValues {
    pub fn as_strings(&self) -> Vec<String> {
        self.values.iter().filter_map(value_to_string).collect()
    }
}

/// `GET /forecast/metadata`: distinct values for every filterable column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionMetadata {
    pub columns: BTreeMap<String, Value>,
}

impl DimensionMetadata {
    /// Values for a column rendered as strings. Nulls are dropped.
    pub fn values_for(&self, column: FilterDimension) -> Vec<String> {
        match self.columns.get(column.as_ref()) {
            Some(Value::Array(items)) => items.iter().filter_map(value_to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// `GET /forecast/health`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, alias = "row_count")]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.to_ascii_lowercase().as_str(), "healthy" | "ok")
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
