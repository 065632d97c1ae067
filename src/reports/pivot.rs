//! Weekly pivot of forecast records.
//!
//! Rows are (brick, site) pairs, columns are the most recent N ISO weeks and
//! cells hold the predicted quantity, zero when no record exists.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::weeks::{week_window, WeekDescriptor, WeekId};
use crate::models::ForecastRecord;

pub const DEFAULT_WINDOW_WEEKS: usize = 5;

/// Row label used for records without a brick.
pub const UNKNOWN_BRICK: &str = "Unknown";

/// What to do when several records land on the same (row, week) cell.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollisionPolicy {
    /// The record that comes last in input order wins.
    #[default]
    LastWins,
    /// Quantities are added up.
    Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotOptions {
    pub window_weeks: usize,
    pub collision: CollisionPolicy,
}

impl Default for PivotOptions {
    fn default() -> Self {
        Self {
            window_weeks: DEFAULT_WINDOW_WEEKS,
            collision: CollisionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub mh_brick: String,
    pub site_id: String,
    /// One cell per window week, zero-filled.
    pub weeks: BTreeMap<WeekId, f64>,
}

impl PivotRow {
    pub fn quantity(&self, week: WeekId) -> Option<f64> {
        self.weeks.get(&week).copied()
    }

    pub fn total(&self) -> f64 {
        self.weeks.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub rows: Vec<PivotRow>,
    pub weeks: Vec<WeekDescriptor>,
}

/// One page of pivot rows plus the controls a table footer needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotPage<'a> {
    pub rows: &'a [PivotRow],
    pub weeks: &'a [WeekDescriptor],
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pivot {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of every row per window week, in column order.
    pub fn week_totals(&self) -> Vec<f64> {
        self.weeks
            .iter()
            .map(|w| self.rows.iter().filter_map(|r| r.quantity(w.id)).sum())
            .collect()
    }

    /// 1-based page of rows. Out of range pages come back empty.
    pub fn page(&self, page: usize, page_size: usize) -> PivotPage<'_> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_rows = self.rows.len();
        let total_pages = total_rows.div_ceil(page_size);
        let start = (page - 1).saturating_mul(page_size).min(total_rows);
        let end = start.saturating_add(page_size).min(total_rows);

        PivotPage {
            rows: &self.rows[start..end],
            weeks: &self.weeks,
            page,
            page_size,
            total_rows,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Builds the pivot for the `options.window_weeks` ISO weeks ending with the
/// week of `reference`, at most [`super::weeks::MAX_WINDOW_WEEKS`].
///
/// Records without a parseable week, or whose week falls outside the window,
/// are skipped. The result depends only on the arguments.
pub fn build_pivot<'a, I>(records: I, reference: NaiveDate, options: &PivotOptions) -> Pivot
where
    I: IntoIterator<Item = &'a ForecastRecord>,
{
    let window = week_window(reference, options.window_weeks);
    let in_window: BTreeSet<WeekId> = window.iter().copied().collect();

    let mut groups: BTreeMap<(String, String), BTreeMap<WeekId, f64>> = BTreeMap::new();
    let mut undated = 0usize;
    let mut outside = 0usize;

    for record in records {
        let Some(date) = record.forecast_week else {
            undated += 1;
            continue;
        };
        let week = WeekId::of(date);
        if !in_window.contains(&week) {
            outside += 1;
            continue;
        }

        let brick = record
            .mh_brick
            .clone()
            .unwrap_or_else(|| UNKNOWN_BRICK.to_string());
        let cells = groups
            .entry((brick, record.site_id.clone()))
            .or_default();
        match options.collision {
            CollisionPolicy::LastWins => {
                cells.insert(week, record.predicted_qty);
            }
            CollisionPolicy::Sum => {
                *cells.entry(week).or_insert(0.0) += record.predicted_qty;
            }
        }
    }

    if undated > 0 || outside > 0 {
        debug!(undated, outside, "skipped forecast records outside the pivot window");
    }

    let rows = groups
        .into_iter()
        .map(|((mh_brick, site_id), cells)| PivotRow {
            mh_brick,
            site_id,
            weeks: window
                .iter()
                .map(|week| (*week, cells.get(week).copied().unwrap_or(0.0)))
                .collect(),
        })
        .collect();

    Pivot {
        rows,
        weeks: window.into_iter().map(WeekDescriptor::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 13).unwrap()
    }

    fn weeks_ago(n: u64) -> NaiveDate {
        today().checked_sub_days(Days::new(7 * n)).unwrap()
    }

    fn record(brick: Option<&str>, site: &str, date: NaiveDate, qty: f64) -> ForecastRecord {
        let mut r = ForecastRecord::new(site, date, qty);
        r.mh_brick = brick.map(str::to_string);
        r
    }

    #[test]
    fn single_record_in_current_week() {
        let records = vec![record(Some("A"), "S1", today(), 10.0)];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());

        assert_eq!(pivot.rows.len(), 1);
        let row = &pivot.rows[0];
        assert_eq!((row.mh_brick.as_str(), row.site_id.as_str()), ("A", "S1"));
        let cells: Vec<f64> = pivot.weeks.iter().map(|w| row.weeks[&w.id]).collect();
        assert_eq!(cells, vec![0.0, 0.0, 0.0, 0.0, 10.0]);
        let labels: Vec<&str> = pivot.weeks.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["W7", "W8", "W9", "W10", "W11"]);
    }

    #[test]
    fn empty_input_still_describes_every_week() {
        let records: Vec<ForecastRecord> = Vec::new();
        let pivot = build_pivot(&records, today(), &PivotOptions::default());
        assert!(pivot.is_empty());
        assert_eq!(pivot.weeks.len(), 5);
        assert_eq!(pivot.weeks[4].range, "11 Mar - 17 Mar");
    }

    #[test]
    fn records_outside_the_window_are_dropped() {
        let records = vec![
            record(Some("A"), "S1", weeks_ago(4), 1.0),
            record(Some("A"), "S1", weeks_ago(5), 99.0),
            record(Some("B"), "S2", weeks_ago(6), 7.0),
            record(Some("A"), "S1", today().checked_add_days(Days::new(7)).unwrap(), 50.0),
        ];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());
        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].total(), 1.0);
    }

    #[test]
    fn undated_records_are_skipped() {
        let mut broken = record(Some("A"), "S1", today(), 3.0);
        broken.forecast_week = None;
        let pivot = build_pivot(&[broken], today(), &PivotOptions::default());
        assert!(pivot.rows.is_empty());
        assert_eq!(pivot.weeks.len(), 5);
    }

    #[test]
    fn missing_brick_groups_under_unknown() {
        let records = vec![
            record(None, "S1", today(), 2.0),
            record(None, "S1", weeks_ago(1), 3.0),
        ];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());
        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].mh_brick, UNKNOWN_BRICK);
        assert_eq!(pivot.rows[0].total(), 5.0);
    }

    #[test]
    fn collisions_follow_the_policy() {
        let records = vec![
            record(Some("A"), "S1", today(), 4.0),
            // Same week, different weekday.
            record(Some("A"), "S1", today().checked_sub_days(Days::new(2)).unwrap(), 6.0),
        ];
        let current = WeekId::of(today());

        let last = build_pivot(&records, today(), &PivotOptions::default());
        assert_eq!(last.rows[0].quantity(current), Some(6.0));

        let sum = build_pivot(
            &records,
            today(),
            &PivotOptions { collision: CollisionPolicy::Sum, ..Default::default() },
        );
        assert_eq!(sum.rows[0].quantity(current), Some(10.0));
    }

    #[test]
    fn rows_are_sorted_by_brick_then_site() {
        let records = vec![
            record(Some("B"), "S1", today(), 1.0),
            record(Some("A"), "S2", today(), 1.0),
            record(Some("A"), "S1", today(), 1.0),
        ];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());
        let keys: Vec<(&str, &str)> = pivot
            .rows
            .iter()
            .map(|r| (r.mh_brick.as_str(), r.site_id.as_str()))
            .collect();
        assert_eq!(keys, vec![("A", "S1"), ("A", "S2"), ("B", "S1")]);
        assert_eq!(pivot.week_totals(), vec![0.0, 0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn window_spanning_new_year_keeps_old_weeks() {
        let reference = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let december = NaiveDate::from_ymd_opt(2023, 12, 20).unwrap();
        let records = vec![record(Some("A"), "S1", december, 8.0)];
        let pivot = build_pivot(&records, reference, &PivotOptions::default());

        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].quantity(WeekId::of(december)), Some(8.0));
        let labels: Vec<&str> = pivot.weeks.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["W49", "W50", "W51", "W52", "W1"]);
    }

    #[test]
    fn pages_slice_rows() {
        let records: Vec<_> = (0..7)
            .map(|i| record(Some("A"), &format!("S{}", i), today(), 1.0))
            .collect();
        let pivot = build_pivot(&records, today(), &PivotOptions::default());

        let first = pivot.page(1, 3);
        assert_eq!(first.rows.len(), 3);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next && !first.has_prev);

        let last = pivot.page(3, 3);
        assert_eq!(last.rows.len(), 1);
        assert!(!last.has_next && last.has_prev);

        assert!(pivot.page(9, 3).rows.is_empty());
    }

    #[test]
    fn huge_page_numbers_are_empty() {
        let records = vec![record(Some("A"), "S1", today(), 1.0)];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());

        let page = pivot.page(usize::MAX, 50);
        assert!(page.rows.is_empty());
        assert!(!page.has_next && page.has_prev);
        assert_eq!(page.total_rows, 1);

        assert_eq!(pivot.page(1, usize::MAX).rows.len(), 1);
    }

    #[test]
    fn oversized_window_is_capped() {
        let options = PivotOptions {
            window_weeks: usize::MAX,
            ..PivotOptions::default()
        };
        let records: Vec<ForecastRecord> = Vec::new();
        let pivot = build_pivot(&records, today(), &options);
        assert_eq!(pivot.weeks.len(), crate::reports::weeks::MAX_WINDOW_WEEKS);
        assert_eq!(pivot.weeks.last().unwrap().label, "W11");
    }

    #[test]
    fn pivot_serializes_week_keys_as_strings() {
        let records = vec![record(Some("A"), "S1", today(), 10.0)];
        let pivot = build_pivot(&records, today(), &PivotOptions::default());
        let json = serde_json::to_value(&pivot).unwrap();
        assert_eq!(json["rows"][0]["weeks"]["2024-W11"], 10.0);
        assert_eq!(json["weeks"][0]["id"], "2024-W07");
    }
}
