//! Exhaustive checks of FY selection over small generated histories

use chrono::{NaiveDate, NaiveTime};
use pretty_assertions::assert_eq;
use test_log::test;

use rust_stocks_valuation::analysis::fy_selector::{period_survivors, select_canonical_fy, SelectionKey};
use rust_stocks_valuation::models::{Disclosure, PeriodType};

use crate::common::test_data::{date, fy};

/// Every combination of three period ends, three filing dates and an
/// optional filing time, in a scrambled order
fn generated_history() -> Vec<Disclosure> {
    let period_ends = [date(2019, 3, 31), date(2019, 12, 31), date(2020, 3, 31)];
    let filed = [date(2020, 2, 14), date(2020, 5, 12), date(2020, 8, 7)];
    let times = [None, NaiveTime::from_hms_opt(15, 0, 0)];

    let mut history = Vec::new();
    for (i, end) in period_ends.iter().enumerate() {
        for (j, disclosed) in filed.iter().enumerate() {
            for time in times {
                if *disclosed <= *end {
                    continue;
                }
                let mut d = fy("1605", *disclosed, *end);
                d.disclosed_time = time;
                d.profit = Some((i * 10 + j) as f64);
                history.push(d);
            }
        }
    }
    history.reverse();
    history
}

fn as_of_dates() -> Vec<NaiveDate> {
    vec![
        date(2020, 2, 13),
        date(2020, 2, 14),
        date(2020, 6, 1),
        date(2020, 8, 7),
        date(2021, 1, 1),
    ]
}

#[test]
fn test_selected_is_the_greatest_key_among_visible_candidates() {
    let history = generated_history();

    for as_of in as_of_dates() {
        let expected = history
            .iter()
            .filter(|d| d.disclosed_date <= as_of)
            .map(SelectionKey::of)
            .max();
        let selected = select_canonical_fy(&history, "1605", as_of).map(SelectionKey::of);
        assert_eq!(selected, expected, "as_of {}", as_of);
    }
}

#[test]
fn test_one_survivor_per_period_and_it_is_the_latest_filing() {
    let history = generated_history();

    for as_of in as_of_dates() {
        let survivors = period_survivors(&history, "1605", as_of);

        let mut periods: Vec<NaiveDate> = survivors.iter().map(|d| d.current_period_end).collect();
        periods.dedup();
        assert_eq!(periods.len(), survivors.len());

        for s in &survivors {
            let latest_for_period = history
                .iter()
                .filter(|d| d.current_period_end == s.current_period_end && d.disclosed_date <= as_of)
                .map(SelectionKey::of)
                .max();
            assert_eq!(Some(SelectionKey::of(s)), latest_for_period);
        }
    }
}

#[test]
fn test_selection_ignores_input_order() {
    let history = generated_history();
    let mut reordered = history.clone();
    reordered.sort_by_key(|d| (d.disclosed_date, d.current_period_end));

    for as_of in as_of_dates() {
        assert_eq!(
            select_canonical_fy(&history, "1605", as_of),
            select_canonical_fy(&reordered, "1605", as_of)
        );
    }
}

#[test]
fn test_quarterly_rows_never_selected() {
    let mut history = generated_history();
    for d in history.iter_mut() {
        d.period_type = PeriodType::Q3;
    }
    assert_eq!(select_canonical_fy(&history, "1605", date(2021, 1, 1)), None);
}
