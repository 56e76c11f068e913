use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::analysis::share_reconciler::ShareReconciliation;
use crate::models::{CanonicalFyRecord, ForecastSource, MetricField, ValuationFeature};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRatios {
    pub market_cap: Option<f64>,
    pub per: Option<f64>,
    pub forward_per: Option<f64>,
    pub pbr: Option<f64>,
    pub forecast_source: Option<ForecastSource>,
}

/// numerator / denominator, undefined for a missing or non-positive denominator
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Forward PER denominator: the resolved forecast profit, or with
/// `next_year_fallback` the selected filing's next-year forecast.
fn forward_denominator(
    record: &CanonicalFyRecord,
    next_year_fallback: bool,
) -> Option<(f64, ForecastSource)> {
    let current = record
        .value(MetricField::ForecastProfit)
        .filter(|v| *v > 0.0)
        .map(|v| (v, ForecastSource::CurrentYear));

    if current.is_some() || !next_year_fallback {
        return current;
    }

    record
        .disclosure
        .next_year_forecast_profit
        .filter(|v| *v > 0.0)
        .map(|v| (v, ForecastSource::NextYear))
}

/// Market cap and the three ratios. Without a price or a share basis every
/// output is undefined; nothing is approximated.
pub fn calculate_ratios(
    record: &CanonicalFyRecord,
    adjusted_price: Option<f64>,
    shares: Option<&ShareReconciliation>,
    next_year_fallback: bool,
) -> ValuationRatios {
    let market_cap = match (adjusted_price, shares) {
        (Some(price), Some(s)) if price > 0.0 && s.latest_basis_shares > 0.0 => {
            Some(price * s.latest_basis_shares)
        }
        _ => None,
    };

    let forward = forward_denominator(record, next_year_fallback);

    ValuationRatios {
        market_cap,
        per: ratio(market_cap, record.value(MetricField::Profit)),
        pbr: ratio(market_cap, record.value(MetricField::Equity)),
        forward_per: ratio(market_cap, forward.map(|(v, _)| v)),
        forecast_source: forward.map(|(_, source)| source),
    }
}

/// Assemble the feature row for (code, as_of)
pub fn build_feature(
    record: &CanonicalFyRecord,
    as_of: NaiveDate,
    adjusted_price: Option<f64>,
    shares: Option<&ShareReconciliation>,
    ratios: &ValuationRatios,
) -> ValuationFeature {
    ValuationFeature {
        code: record.code().to_string(),
        as_of_date: as_of,
        adjusted_price,
        latest_basis_shares: shares.map(|s| s.latest_basis_shares),
        cumulative_adjustment_factor: shares.map(|s| s.cumulative_adjustment_factor),
        market_cap: ratios.market_cap,
        per: ratios.per,
        forward_per: ratios.forward_per,
        pbr: ratios.pbr,
        fy_period_end: record.disclosure.current_period_end,
        fy_disclosed_date: record.disclosure.disclosed_date,
        forecast_source: ratios.forecast_source,
        provenance: record.fields.clone(),
    }
}

/// Relative gaps between market-cap ratios and per-share ratios.
///
/// When the eps/bvps share basis equals the reconciled share count these
/// must agree; a gap means a share-basis or imputation defect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub per_gap: Option<f64>,
    pub pbr_gap: Option<f64>,
    pub forward_per_gap: Option<f64>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        [self.per_gap, self.pbr_gap, self.forward_per_gap]
            .iter()
            .flatten()
            .all(|gap| *gap <= tolerance)
    }
}

fn relative_gap(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() => {
            let scale = a.abs().max(b.abs());
            if scale == 0.0 {
                Some(0.0)
            } else {
                Some((a - b).abs() / scale)
            }
        }
        _ => None,
    }
}

/// Compare per/pbr/forward_per with price/eps, price/bvps, price/forecast_eps
pub fn check_consistency(
    record: &CanonicalFyRecord,
    adjusted_price: Option<f64>,
    ratios: &ValuationRatios,
) -> ConsistencyReport {
    let per_share = |field: MetricField| ratio(adjusted_price, record.value(field));

    // forward oracle only applies to the current-year forecast
    let forward_oracle = match ratios.forecast_source {
        Some(ForecastSource::CurrentYear) => per_share(MetricField::ForecastEps),
        _ => None,
    };

    ConsistencyReport {
        per_gap: relative_gap(ratios.per, per_share(MetricField::Eps)),
        pbr_gap: relative_gap(ratios.pbr, per_share(MetricField::Bvps)),
        forward_per_gap: relative_gap(ratios.forward_per, forward_oracle),
    }
}
