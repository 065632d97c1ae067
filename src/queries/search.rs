//! Client-side composition of search and filter predicates.
//!
//! All active filters must match (logical AND). There is no precedence
//! between them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::filter::{DateRange, FilterState, QuantityRange};
use crate::models::{FilterDimension, ForecastRecord};

/// Record fields the free-text term is matched against.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchField {
    MhBrick,
    SiteId,
    Brand,
    MhSegment,
    MhFamily,
    MhClass,
    ProductId,
}

impl SearchField {
    fn value<'a>(&self, record: &'a ForecastRecord) -> Option<&'a str> {
        match self {
            SearchField::MhBrick => record.mh_brick.as_deref(),
            SearchField::SiteId => Some(record.site_id.as_str()),
            SearchField::Brand => record.brand.as_deref(),
            SearchField::MhSegment => record.mh_segment.as_deref(),
            SearchField::MhFamily => record.mh_family.as_deref(),
            SearchField::MhClass => record.mh_class.as_deref(),
            SearchField::ProductId => record.product_id.as_deref(),
        }
    }
}

/// The set of fields free-text search looks at. Defaults to brick and site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFields(BTreeSet<SearchField>);

impl Default for SearchFields {
    fn default() -> Self {
        Self([SearchField::MhBrick, SearchField::SiteId].into_iter().collect())
    }
}

impl SearchFields {
    pub fn new(fields: impl IntoIterator<Item = SearchField>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn contains(&self, field: SearchField) -> bool {
        self.0.contains(&field)
    }

    pub fn toggle(&mut self, field: SearchField) {
        if !self.0.remove(&field) {
            self.0.insert(field);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SearchField> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn record_attribute(record: &ForecastRecord, dimension: FilterDimension) -> Option<&str> {
    match dimension {
        FilterDimension::Zone => record.zone.as_deref(),
        FilterDimension::State => record.state.as_deref(),
        FilterDimension::City => record.city.as_deref(),
        FilterDimension::SiteId => Some(record.site_id.as_str()),
        FilterDimension::Format => record.format.as_deref(),
        FilterDimension::Brand => record.brand.as_deref(),
        FilterDimension::MhSegment => record.mh_segment.as_deref(),
        FilterDimension::MhFamily => record.mh_family.as_deref(),
        FilterDimension::MhClass => record.mh_class.as_deref(),
        FilterDimension::MhBrick => record.mh_brick.as_deref(),
    }
}

/// AND of every active filter in a [`FilterState`].
#[derive(Debug, Clone)]
pub struct RecordPredicate {
    term: Option<String>,
    fields: SearchFields,
    categorical: Vec<(FilterDimension, BTreeSet<String>)>,
    date_range: Option<DateRange>,
    quantity_range: Option<QuantityRange>,
}

impl RecordPredicate {
    pub fn from_filter(filter: &FilterState, fields: &SearchFields) -> Self {
        let filter = filter.normalized();
        let categorical = filter
            .categorical()
            .into_iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(dimension, set)| (dimension, set.clone()))
            .collect();

        Self {
            term: filter.search.as_deref().map(str::to_lowercase),
            fields: fields.clone(),
            categorical,
            date_range: filter.date_range,
            quantity_range: filter.quantity_range,
        }
    }

    pub fn matches(&self, record: &ForecastRecord) -> bool {
        if let Some(term) = &self.term {
            let hit = self.fields.iter().any(|field| {
                field
                    .value(record)
                    .is_some_and(|v| v.to_lowercase().contains(term.as_str()))
            });
            if !hit {
                return false;
            }
        }

        for (dimension, allowed) in &self.categorical {
            match record_attribute(record, *dimension) {
                Some(value) if allowed.contains(value) => {}
                _ => return false,
            }
        }

        if let Some(range) = &self.date_range {
            match record.forecast_week {
                Some(week) if range.contains(week) => {}
                _ => return false,
            }
        }

        if let Some(range) = &self.quantity_range {
            if !range.contains(record.predicted_qty) {
                return false;
            }
        }

        true
    }

    /// Matching records, input order preserved.
    pub fn apply<'a>(&self, records: &'a [ForecastRecord]) -> Vec<&'a ForecastRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn sample() -> Vec<ForecastRecord> {
        let mut a = ForecastRecord::new("S1", day(4), 10.0).with_brick("Shampoo");
        a.zone = Some("North".into());
        a.brand = Some("Acme".into());
        let mut b = ForecastRecord::new("S2", day(11), 3.0).with_brick("Soap");
        b.zone = Some("South".into());
        let c = ForecastRecord::new("X-shampoo-9", day(18), 7.0);
        vec![a, b, c]
    }

    #[test]
    fn no_filters_match_everything() {
        let records = sample();
        let pred = RecordPredicate::from_filter(&FilterState::new(), &SearchFields::default());
        assert_eq!(pred.apply(&records).len(), 3);
    }

    #[test]
    fn search_uses_configured_fields() {
        let records = sample();
        let filter = FilterState::new().with_search("SHAMPOO");

        let default_fields = RecordPredicate::from_filter(&filter, &SearchFields::default());
        let sites: Vec<_> = default_fields.apply(&records).iter().map(|r| r.site_id.clone()).collect();
        assert_eq!(sites, vec!["S1", "X-shampoo-9"]);

        let brick_only = SearchFields::new([SearchField::MhBrick]);
        let pred = RecordPredicate::from_filter(&filter, &brick_only);
        assert_eq!(pred.apply(&records).len(), 1);

        let mut fields = SearchFields::default();
        fields.toggle(SearchField::SiteId);
        fields.toggle(SearchField::MhBrick);
        assert!(fields.is_empty());
        assert!(RecordPredicate::from_filter(&filter, &fields).apply(&records).is_empty());
    }

    #[test]
    fn filters_combine_with_and() {
        let records = sample();
        let filter = FilterState::new()
            .with_value(FilterDimension::Zone, "North")
            .with_value(FilterDimension::Zone, "South")
            .with_quantity_range(Some(5.0), None);
        let pred = RecordPredicate::from_filter(&filter, &SearchFields::default());
        let hits = pred.apply(&records);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].site_id, "S1");
    }

    #[test]
    fn missing_attribute_fails_active_categorical_filter() {
        let records = sample();
        let filter = FilterState::new().with_value(FilterDimension::Brand, "Acme");
        let pred = RecordPredicate::from_filter(&filter, &SearchFields::default());
        assert_eq!(pred.apply(&records).len(), 1);
    }

    #[test]
    fn date_range_is_inclusive_and_skips_unknown_weeks() {
        let mut records = sample();
        records[2].forecast_week = None;
        let filter = FilterState::new().with_date_range(Some(day(4)), Some(day(18)));
        let pred = RecordPredicate::from_filter(&filter, &SearchFields::default());
        let sites: Vec<_> = pred.apply(&records).iter().map(|r| r.site_id.as_str()).collect();
        assert_eq!(sites, vec!["S1", "S2"]);
    }
}
