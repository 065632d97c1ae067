use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::ApiError;
use crate::models::FilterDimension;

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Inclusive week range. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Inclusive predicted-quantity range. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl QuantityRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, qty: f64) -> bool {
        self.min.map_or(true, |m| qty >= m) && self.max.map_or(true, |m| qty <= m)
    }

    fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// `-0.0` and `0.0` compare equal but serialize differently.
    fn canonical(self) -> Self {
        fn unsigned_zero(bound: f64) -> f64 {
            if bound == 0.0 {
                0.0
            } else {
                bound
            }
        }
        Self {
            min: self.min.map(unsigned_zero),
            max: self.max.map(unsigned_zero),
        }
    }
}

/// Every active filter plus pagination.
///
/// Categorical filters are ordered sets so two states built with the same
/// members in a different order compare and serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub zone: BTreeSet<String>,
    #[serde(default)]
    pub state: BTreeSet<String>,
    #[serde(default)]
    pub city: BTreeSet<String>,
    #[serde(default)]
    pub site_id: BTreeSet<String>,
    #[serde(default)]
    pub format: BTreeSet<String>,
    #[serde(default)]
    pub brand: BTreeSet<String>,
    #[serde(default)]
    pub mh_brick: BTreeSet<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub quantity_range: Option<QuantityRange>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            search: None,
            zone: BTreeSet::new(),
            state: BTreeSet::new(),
            city: BTreeSet::new(),
            site_id: BTreeSet::new(),
            format: BTreeSet::new(),
            brand: BTreeSet::new(),
            mh_brick: BTreeSet::new(),
            date_range: None,
            quantity_range: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduced projection used by the single-brick pivot view.
    pub fn for_brick(brick: impl Into<String>, date_range: Option<DateRange>) -> Self {
        let mut state = Self::default();
        state.mh_brick.insert(brick.into());
        state.date_range = date_range;
        state
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn with_value(mut self, dimension: FilterDimension, value: impl Into<String>) -> Self {
        if let Some(set) = self.set_mut(dimension) {
            set.insert(value.into());
        }
        self
    }

    pub fn with_date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.date_range = Some(DateRange::new(start, end));
        self
    }

    pub fn with_quantity_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.quantity_range = Some(QuantityRange::new(min, max));
        self
    }

    pub fn with_page(mut self, page: u64, page_size: u64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Categorical set for a dimension. Hierarchy levels above the brick are
    /// not filterable through `FilterState`.
    pub fn set(&self, dimension: FilterDimension) -> Option<&BTreeSet<String>> {
        match dimension {
            FilterDimension::Zone => Some(&self.zone),
            FilterDimension::State => Some(&self.state),
            FilterDimension::City => Some(&self.city),
            FilterDimension::SiteId => Some(&self.site_id),
            FilterDimension::Format => Some(&self.format),
            FilterDimension::Brand => Some(&self.brand),
            FilterDimension::MhBrick => Some(&self.mh_brick),
            FilterDimension::MhSegment | FilterDimension::MhFamily | FilterDimension::MhClass => {
                None
            }
        }
    }

    fn set_mut(&mut self, dimension: FilterDimension) -> Option<&mut BTreeSet<String>> {
        match dimension {
            FilterDimension::Zone => Some(&mut self.zone),
            FilterDimension::State => Some(&mut self.state),
            FilterDimension::City => Some(&mut self.city),
            FilterDimension::SiteId => Some(&mut self.site_id),
            FilterDimension::Format => Some(&mut self.format),
            FilterDimension::Brand => Some(&mut self.brand),
            FilterDimension::MhBrick => Some(&mut self.mh_brick),
            FilterDimension::MhSegment | FilterDimension::MhFamily | FilterDimension::MhClass => {
                None
            }
        }
    }

    /// Categorical dimensions in wire order, paired with their sets.
    pub fn categorical(&self) -> [(FilterDimension, &BTreeSet<String>); 7] {
        [
            (FilterDimension::Zone, &self.zone),
            (FilterDimension::State, &self.state),
            (FilterDimension::City, &self.city),
            (FilterDimension::SiteId, &self.site_id),
            (FilterDimension::Format, &self.format),
            (FilterDimension::Brand, &self.brand),
            (FilterDimension::MhBrick, &self.mh_brick),
        ]
    }

    pub fn normalized(&self) -> Self {
        fn clean(set: &BTreeSet<String>) -> BTreeSet<String> {
            set.iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        }

        Self {
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            zone: clean(&self.zone),
            state: clean(&self.state),
            city: clean(&self.city),
            site_id: clean(&self.site_id),
            format: clean(&self.format),
            brand: clean(&self.brand),
            mh_brick: clean(&self.mh_brick),
            date_range: self.date_range.filter(|r| !r.is_open()),
            quantity_range: self
                .quantity_range
                .filter(|r| !r.is_open())
                .map(QuantityRange::canonical),
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Canonical cache key. Equal states always map to the same key.
    pub fn cache_key(&self) -> String {
        // Struct fields serialize in declaration order and sets are sorted.
        serde_json::to_string(&self.normalized()).unwrap_or_default()
    }

    pub fn offset(&self) -> u64 {
        let normalized = self.normalized();
        (normalized.page - 1).saturating_mul(normalized.page_size)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = self.date_range
        {
            if start > end {
                return Err(ApiError::Validation(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }
        if let Some(range) = self.quantity_range {
            for bound in [range.min, range.max].into_iter().flatten() {
                if !bound.is_finite() || bound < 0.0 {
                    return Err(ApiError::Validation(format!(
                        "quantity bound {} must be a non-negative number",
                        bound
                    )));
                }
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(ApiError::Validation(format!(
                        "minimum quantity {} exceeds maximum {}",
                        min, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Query parameters for `GET /forecast/`, `limit`/`offset` included.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.filter_pairs();
        let normalized = self.normalized();
        pairs.push(("limit".to_string(), normalized.page_size.to_string()));
        pairs.push(("offset".to_string(), self.offset().to_string()));
        pairs
    }

    /// Query parameters without pagination, used by the summary endpoint.
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        let normalized = self.normalized();
        let mut pairs = Vec::new();
        if let Some(search) = &normalized.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        for (dimension, values) in normalized.categorical() {
            for value in values {
                pairs.push((dimension.to_string(), value.clone()));
            }
        }
        if let Some(range) = normalized.date_range {
            if let Some(start) = range.start {
                pairs.push(("start_date".to_string(), start.format("%Y-%m-%d").to_string()));
            }
            if let Some(end) = range.end {
                pairs.push(("end_date".to_string(), end.format("%Y-%m-%d").to_string()));
            }
        }
        if let Some(range) = normalized.quantity_range {
            if let Some(min) = range.min {
                pairs.push(("min_qty".to_string(), min.to_string()));
            }
            if let Some(max) = range.max {
                pairs.push(("max_qty".to_string(), max.to_string()));
            }
        }
        pairs
    }

    /// Whether any filter besides pagination is active.
    pub fn is_filtered(&self) -> bool {
        let n = self.normalized();
        n.search.is_some()
            || n.categorical().iter().any(|(_, set)| !set.is_empty())
            || n.date_range.is_some()
            || n.quantity_range.is_some()
    }
}

/// Body for `POST /forecast/chunked-filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedFilterRequest {
    #[serde(flatten)]
    pub filters: FilterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

impl ChunkedFilterRequest {
    pub fn new(filters: FilterState) -> Self {
        Self {
            filters,
            chunk_size: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn normalized(&self) -> Self {
        Self {
            filters: self.filters.normalized(),
            chunk_size: self.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn independently_built_states_share_a_key() {
        let a = FilterState::new()
            .with_value(FilterDimension::Zone, "North")
            .with_value(FilterDimension::Zone, "East")
            .with_value(FilterDimension::Brand, "Acme")
            .with_search("shampoo");
        let b = FilterState::new()
            .with_search("  shampoo ")
            .with_value(FilterDimension::Brand, "Acme")
            .with_value(FilterDimension::Zone, "East")
            .with_value(FilterDimension::Zone, "North");
        assert_eq!(a.cache_key(), b.cache_key());

        let round_trip: FilterState = serde_json::from_str(&a.cache_key()).unwrap();
        assert_eq!(round_trip.cache_key(), a.cache_key());

        let negative_zero = FilterState::new().with_quantity_range(Some(-0.0), Some(10.0));
        let zero = FilterState::new().with_quantity_range(Some(0.0), Some(10.0));
        assert_eq!(negative_zero.cache_key(), zero.cache_key());
    }

    #[test]
    fn offset_saturates_for_huge_pages() {
        let filter = FilterState::new().with_page(u64::MAX, MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), u64::MAX);
        assert_eq!(FilterState::new().with_page(3, 50).offset(), 100);
    }

    #[test]
    fn different_pages_have_different_keys() {
        let a = FilterState::new().with_page(1, 50);
        let b = FilterState::new().with_page(2, 50);
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn empty_filters_normalize_away() {
        let a = FilterState::new()
            .with_search("   ")
            .with_value(FilterDimension::City, " ")
            .with_date_range(None, None);
        assert_eq!(a.cache_key(), FilterState::new().cache_key());
        assert!(!a.is_filtered());
    }

    #[test]
    fn query_pairs_cover_filters_and_paging() {
        let state = FilterState::new()
            .with_search("soap")
            .with_value(FilterDimension::SiteId, "S2")
            .with_value(FilterDimension::SiteId, "S1")
            .with_date_range(Some(day(2024, 1, 1)), None)
            .with_quantity_range(None, Some(10.0))
            .with_page(3, 20);
        let pairs = state.to_query_pairs();
        let expect = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(
            pairs,
            vec![
                expect("search", "soap"),
                expect("site_id", "S1"),
                expect("site_id", "S2"),
                expect("start_date", "2024-01-01"),
                expect("max_qty", "10"),
                expect("limit", "20"),
                expect("offset", "40"),
            ]
        );
    }

    #[test]
    fn page_zero_is_clamped() {
        let state = FilterState::new().with_page(0, 0);
        assert_eq!(state.offset(), 0);
        assert_eq!(state.normalized().page_size, 1);
    }

    #[test]
    fn inverted_ranges_fail_validation() {
        let dates = FilterState::new().with_date_range(Some(day(2024, 2, 1)), Some(day(2024, 1, 1)));
        assert_matches!(dates.validate(), Err(ApiError::Validation(_)));

        let qty = FilterState::new().with_quantity_range(Some(5.0), Some(1.0));
        assert_matches!(qty.validate(), Err(ApiError::Validation(_)));

        let negative = FilterState::new().with_quantity_range(Some(-1.0), None);
        assert_matches!(negative.validate(), Err(ApiError::Validation(_)));

        assert!(FilterState::new().validate().is_ok());
    }

    #[test]
    fn brick_projection() {
        let state = FilterState::for_brick("Soap", None);
        assert!(state.mh_brick.contains("Soap"));
        assert!(state.is_filtered());
    }

    #[test]
    fn chunked_request_flattens_filters() {
        let req = ChunkedFilterRequest::new(FilterState::new().with_value(FilterDimension::Zone, "N"))
            .with_chunk_size(500);
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["zone"][0], "N");
        assert_eq!(body["chunk_size"], 500);
        assert_eq!(body["page"], 1);
    }
}
