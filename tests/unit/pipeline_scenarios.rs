//! End-to-end valuation of one code from in-memory history

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use test_log::test;

use rust_stocks_valuation::errors::{ShareBasisError, ValuationError};
use rust_stocks_valuation::feature_materializer::{imputed_fields, value_code_from_history};
use rust_stocks_valuation::models::{
    Config, FieldSource, ForecastSource, MetricField, PeriodType, ValueKind,
};

use crate::common::logging;
use crate::common::test_data::{date, daily_prices, fy, price, quarterly};

#[test]
fn test_quarterly_fills_operating_profit_when_no_sibling_has_it() {
    logging::init_test_logging();

    let mut selected = fy("7203", date(2020, 5, 12), date(2020, 3, 31));
    selected.operating_profit = None;
    selected.forecast_operating_profit = Some(8_000.0);

    let mut q2 = quarterly("7203", PeriodType::Q2, date(2019, 11, 6), date(2019, 9, 30));
    q2.operating_profit = Some(1_200.0);
    let mut q3 = quarterly("7203", PeriodType::Q3, date(2020, 2, 6), date(2019, 12, 31));
    q3.forecast_operating_profit = Some(2_500.0);
    q3.operating_profit = Some(1_900.0);

    let prices = daily_prices("7203", date(2020, 5, 1), date(2020, 6, 1), 50.0);
    let valuation = value_code_from_history(
        "7203",
        &[q2, q3.clone(), selected],
        &prices,
        date(2020, 6, 1),
        &Config::default(),
    )
    .unwrap();

    let op = valuation.record.field(MetricField::OperatingProfit).unwrap();
    logging::log_test_data("operating profit", op);
    assert_eq!(op.value, Some(1_900.0));
    assert_eq!(op.source, FieldSource::QuarterlyImputed { from: ValueKind::Actual });
    assert_eq!(op.source_disclosure, Some(q3.key()));
    assert_eq!(imputed_fields(&valuation.record), vec![MetricField::OperatingProfit]);
}

#[test]
fn test_split_after_period_end_rebases_share_count() {
    let selected = fy("6758", date(2020, 5, 13), date(2020, 3, 31));
    let prices = vec![
        price("6758", date(2020, 3, 31), 100.0, Some(1.0)),
        price("6758", date(2020, 4, 1), 50.0, Some(0.5)),
        price("6758", date(2020, 6, 1), 25.0, Some(1.0)),
    ];

    let valuation =
        value_code_from_history("6758", &[selected], &prices, date(2020, 6, 1), &Config::default())
            .unwrap();

    let shares = valuation.shares.unwrap();
    assert_eq!(shares.cumulative_adjustment_factor, 0.5);
    assert_eq!(shares.latest_basis_shares, 2_000.0);
    assert_eq!(valuation.feature.market_cap, Some(50_000.0));
    assert_eq!(valuation.feature.per, Some(10.0));
    assert_eq!(valuation.feature.pbr, Some(2.5));
    assert_eq!(valuation.feature.forecast_source, Some(ForecastSource::CurrentYear));
}

#[test]
fn test_before_split_date_uses_unadjusted_count() {
    let selected = fy("6758", date(2020, 5, 13), date(2020, 3, 31));
    let prices = vec![
        price("6758", date(2020, 5, 29), 100.0, Some(1.0)),
        price("6758", date(2020, 6, 2), 50.0, Some(0.5)),
    ];

    let valuation =
        value_code_from_history("6758", &[selected], &prices, date(2020, 6, 1), &Config::default())
            .unwrap();

    assert_eq!(valuation.feature.cumulative_adjustment_factor, Some(1.0));
    assert_eq!(valuation.feature.market_cap, Some(100_000.0));
}

#[test]
fn test_non_positive_adjustment_factor_blanks_ratios_but_keeps_row() {
    let selected = fy("6758", date(2020, 5, 13), date(2020, 3, 31));
    let prices = vec![
        price("6758", date(2020, 4, 1), 50.0, Some(0.0)),
        price("6758", date(2020, 6, 1), 25.0, Some(1.0)),
    ];

    let valuation =
        value_code_from_history("6758", &[selected], &prices, date(2020, 6, 1), &Config::default())
            .unwrap();

    assert_matches!(
        valuation.share_basis_error,
        Some(ShareBasisError::NonPositiveFactor { factor, .. }) if factor == 0.0
    );
    assert_eq!(valuation.feature.adjusted_price, Some(25.0));
    assert_eq!(valuation.feature.latest_basis_shares, None);
    assert_eq!(valuation.feature.market_cap, None);
    assert_eq!(valuation.feature.per, None);
    assert_eq!(valuation.feature.pbr, None);
    assert_eq!(valuation.feature.fy_period_end, date(2020, 3, 31));
}

#[test]
fn test_consistent_inputs_pass_the_oracle() {
    let selected = fy("4063", date(2020, 5, 10), date(2020, 3, 31));
    let prices = daily_prices("4063", date(2020, 5, 25), date(2020, 6, 1), 40.0);
    let config = Config::default();

    let valuation =
        value_code_from_history("4063", &[selected], &prices, date(2020, 6, 1), &config).unwrap();

    assert_eq!(valuation.feature.per, Some(8.0));
    assert!(valuation.consistency.is_consistent(config.consistency_tolerance));
}

#[test]
fn test_non_positive_profit_leaves_per_undefined() {
    let mut selected = fy("9984", date(2020, 5, 18), date(2020, 3, 31));
    selected.profit = Some(-961_500.0);
    selected.forecast_profit = None;
    selected.forecast_eps = None;
    let prices = daily_prices("9984", date(2020, 5, 25), date(2020, 6, 1), 40.0);

    let valuation =
        value_code_from_history("9984", &[selected], &prices, date(2020, 6, 1), &Config::default())
            .unwrap();

    assert_eq!(valuation.feature.per, None);
    assert_eq!(valuation.feature.forward_per, None);
    assert_eq!(valuation.feature.forecast_source, None);
    assert!(valuation.feature.pbr.is_some());
}

#[test]
fn test_next_year_fallback_only_when_enabled() {
    let mut selected = fy("2914", date(2020, 2, 12), date(2019, 12, 31));
    selected.forecast_profit = None;
    selected.forecast_eps = None;
    selected.next_year_forecast_profit = Some(4_000.0);
    let prices = daily_prices("2914", date(2020, 2, 20), date(2020, 3, 2), 20.0);

    let off = value_code_from_history(
        "2914",
        &[selected.clone()],
        &prices,
        date(2020, 3, 2),
        &Config::default(),
    )
    .unwrap();
    assert_eq!(off.feature.forward_per, None);

    let config = Config {
        next_year_forecast_fallback: true,
        ..Config::default()
    };
    let on = value_code_from_history("2914", &[selected], &prices, date(2020, 3, 2), &config).unwrap();
    assert_eq!(on.feature.forward_per, Some(5.0));
    assert_eq!(on.feature.forecast_source, Some(ForecastSource::NextYear));
}

#[test]
fn test_quarterly_only_history_is_missing_fy_data() {
    let mut q1 = quarterly("3382", PeriodType::Q1, date(2020, 7, 9), date(2020, 5, 31));
    q1.profit = Some(100.0);

    let result = value_code_from_history("3382", &[q1], &[], date(2020, 8, 1), &Config::default());
    assert_matches!(result, Err(ValuationError::MissingFyData { .. }));
}

#[test]
fn test_future_rows_do_not_change_the_result() {
    let as_of = date(2020, 6, 1);
    let mut history = vec![fy("8306", date(2020, 5, 15), date(2020, 3, 31))];
    let mut prices = daily_prices("8306", date(2020, 5, 1), as_of, 30.0);

    let before = value_code_from_history("8306", &history, &prices, as_of, &Config::default()).unwrap();

    let mut restated = fy("8306", date(2020, 6, 2), date(2020, 3, 31));
    restated.profit = Some(1.0);
    history.push(restated);
    history.push(fy("8306", date(2021, 5, 14), date(2021, 3, 31)));
    prices.push(price("8306", date(2020, 6, 2), 15.0, Some(0.5)));

    let after = value_code_from_history("8306", &history, &prices, as_of, &Config::default()).unwrap();
    assert_eq!(before.feature, after.feature);
}
