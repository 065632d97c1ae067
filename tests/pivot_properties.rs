//! Property-based tests for the weekly pivot.
//!
//! Records are generated around a fixed reference date, some inside the
//! window and some outside, with and without a brick.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use proptest::prelude::*;

use demand_forecast::models::ForecastRecord;
use demand_forecast::reports::{
    build_pivot, week_window, CollisionPolicy, PivotOptions, WeekId, UNKNOWN_BRICK,
};

fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

// Strategies for generating test data
fn record_strategy() -> impl Strategy<Value = ForecastRecord> {
    (
        prop::option::of(prop::sample::select(vec!["Rice", "Oats", "Tea"])),
        prop::sample::select(vec!["S1", "S2", "S3"]),
        0u64..70,
        0u32..10_000,
        any::<bool>(),
    )
        .prop_map(|(brick, site, days_back, qty, dated)| {
            let week = reference().checked_sub_days(Days::new(days_back)).unwrap();
            let mut record = ForecastRecord::new(site, week, f64::from(qty) / 4.0);
            record.mh_brick = brick.map(str::to_string);
            if !dated {
                record.forecast_week = None;
            }
            record
        })
}

fn options_strategy() -> impl Strategy<Value = PivotOptions> {
    (
        1usize..9,
        prop_oneof![Just(CollisionPolicy::LastWins), Just(CollisionPolicy::Sum)],
    )
        .prop_map(|(window_weeks, collision)| PivotOptions {
            window_weeks,
            collision,
        })
}

fn in_window(record: &ForecastRecord, window: &[WeekId]) -> bool {
    record
        .forecast_week
        .is_some_and(|date| window.contains(&WeekId::of(date)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn building_twice_gives_the_same_pivot(
        records in prop::collection::vec(record_strategy(), 0..40),
        options in options_strategy(),
    ) {
        let first = build_pivot(&records, reference(), &options);
        let second = build_pivot(&records, reference(), &options);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_row_has_one_cell_per_window_week(
        records in prop::collection::vec(record_strategy(), 0..40),
        options in options_strategy(),
    ) {
        let pivot = build_pivot(&records, reference(), &options);
        let window = week_window(reference(), options.window_weeks);

        prop_assert_eq!(pivot.weeks.len(), options.window_weeks);
        let ids: Vec<WeekId> = pivot.weeks.iter().map(|w| w.id).collect();
        prop_assert_eq!(&ids, &window);
        for row in &pivot.rows {
            let keys: Vec<WeekId> = row.weeks.keys().copied().collect();
            prop_assert_eq!(&keys, &window);
        }
    }

    #[test]
    fn summed_cells_match_the_input_and_missing_weeks_are_zero(
        records in prop::collection::vec(record_strategy(), 0..40),
        window_weeks in 1usize..9,
    ) {
        let options = PivotOptions { window_weeks, collision: CollisionPolicy::Sum };
        let pivot = build_pivot(&records, reference(), &options);

        for row in &pivot.rows {
            for (week, cell) in &row.weeks {
                let expected: f64 = records
                    .iter()
                    .filter(|r| r.site_id == row.site_id)
                    .filter(|r| r.mh_brick.as_deref().unwrap_or(UNKNOWN_BRICK) == row.mh_brick)
                    .filter(|r| r.forecast_week.map(WeekId::of) == Some(*week))
                    .map(|r| r.predicted_qty)
                    .sum();
                prop_assert!((cell - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn rows_are_exactly_the_groups_seen_inside_the_window(
        records in prop::collection::vec(record_strategy(), 0..40),
        options in options_strategy(),
    ) {
        let pivot = build_pivot(&records, reference(), &options);
        let window = week_window(reference(), options.window_weeks);

        let expected: BTreeSet<(String, String)> = records
            .iter()
            .filter(|r| in_window(r, &window))
            .map(|r| {
                (
                    r.mh_brick.clone().unwrap_or_else(|| UNKNOWN_BRICK.to_string()),
                    r.site_id.clone(),
                )
            })
            .collect();
        let actual: Vec<(String, String)> = pivot
            .rows
            .iter()
            .map(|r| (r.mh_brick.clone(), r.site_id.clone()))
            .collect();

        // Rows come out sorted and unique.
        prop_assert_eq!(actual, expected.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn records_outside_the_window_change_nothing(
        records in prop::collection::vec(record_strategy(), 0..40),
        options in options_strategy(),
    ) {
        let window = week_window(reference(), options.window_weeks);
        let kept: Vec<ForecastRecord> = records
            .iter()
            .filter(|r| in_window(r, &window))
            .cloned()
            .collect();

        prop_assert_eq!(
            build_pivot(&records, reference(), &options),
            build_pivot(&kept, reference(), &options)
        );
    }

    #[test]
    fn last_wins_keeps_the_final_record_of_each_cell(
        records in prop::collection::vec(record_strategy(), 0..40),
        window_weeks in 1usize..9,
    ) {
        let options = PivotOptions { window_weeks, collision: CollisionPolicy::LastWins };
        let pivot = build_pivot(&records, reference(), &options);

        for row in &pivot.rows {
            for (week, cell) in &row.weeks {
                let last = records
                    .iter()
                    .filter(|r| r.site_id == row.site_id)
                    .filter(|r| r.mh_brick.as_deref().unwrap_or(UNKNOWN_BRICK) == row.mh_brick)
                    .filter(|r| r.forecast_week.map(WeekId::of) == Some(*week))
                    .last()
                    .map(|r| r.predicted_qty)
                    .unwrap_or(0.0);
                prop_assert_eq!(*cell, last);
            }
        }
    }
}

#[test]
fn single_current_week_record_fills_the_last_column() {
    let today = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap();
    let records = vec![ForecastRecord::new("S1", today, 10.0).with_brick("A")];

    let pivot = build_pivot(&records, today, &PivotOptions::default());

    assert_eq!(pivot.rows.len(), 1);
    let row = &pivot.rows[0];
    assert_eq!(row.mh_brick, "A");
    assert_eq!(row.site_id, "S1");
    let cells: Vec<f64> = pivot.weeks.iter().map(|w| row.weeks[&w.id]).collect();
    assert_eq!(cells, vec![0.0, 0.0, 0.0, 0.0, 10.0]);
}

#[test]
fn empty_input_yields_descriptors_only() {
    let today = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap();
    let records: Vec<ForecastRecord> = Vec::new();

    let pivot = build_pivot(&records, today, &PivotOptions::default());

    assert!(pivot.rows.is_empty());
    assert_eq!(pivot.weeks.len(), 5);
    assert!(pivot.weeks.windows(2).all(|w| w[0].end < w[1].start));
}
