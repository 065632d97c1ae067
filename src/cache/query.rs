use serde::Serialize;
use std::fmt;

/// Scopes of the queries the forecast service issues. Each doubles as the
/// key prefix used for group invalidation.
pub mod scope {
    pub const FORECASTS: &str = "forecasts";
    pub const BRICK_FORECASTS: &str = "forecasts:brick";
    pub const SUMMARY: &str = "summary";
    pub const UNIQUE_VALUES: &str = "unique-values";
    pub const METADATA: &str = "metadata";
    pub const HEALTH: &str = "health";
    pub const CHUNKED_FILTER: &str = "chunked-filter";
}

/// Canonical identifier of a cached query: its scope followed by the
/// serialized parameters that affect the response.
///
/// Parameters must serialize deterministically (ordered collections, fixed
/// field order) for equal inputs to produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(scope: &str) -> Self {
        Self(scope.to_string())
    }

    /// Appends one serialized parameter segment.
    pub fn param<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        let encoded = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        self.0.push(':');
        self.0.push_str(&encoded);
        self
    }

    /// Appends an already canonical segment verbatim.
    pub fn raw(mut self, segment: &str) -> Self {
        self.0.push(':');
        self.0.push_str(segment);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0 == prefix || self.0.starts_with(&format!("{}:", prefix))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
