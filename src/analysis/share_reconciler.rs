use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::ShareBasisError;
use crate::models::{CanonicalFyRecord, MetricField, PriceObservation};

/// Share count and equity as recorded at an FY period end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareSnapshot {
    pub code: String,
    pub reference_date: NaiveDate,
    /// Shares outstanding net of treasury stock, raw (unadjusted) basis
    pub net_shares: f64,
    pub equity: Option<f64>,
}

/// Share count translated onto the basis of the adjusted price series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareReconciliation {
    pub snapshot: ShareSnapshot,
    pub as_of: NaiveDate,
    pub cumulative_adjustment_factor: f64,
    pub latest_basis_shares: f64,
}

/// Net shares and equity from the record's own period end.
/// Missing treasury stock counts as zero.
pub fn shares_at(record: &CanonicalFyRecord) -> Result<ShareSnapshot, ShareBasisError> {
    let d = &record.disclosure;
    let missing = || ShareBasisError::MissingShares {
        code: d.code.clone(),
        period_end: d.current_period_end,
    };

    let outstanding = d.shares_outstanding.ok_or_else(missing)?;
    let net_shares = outstanding - d.treasury_shares.unwrap_or(0.0);
    if !net_shares.is_finite() || net_shares <= 0.0 {
        return Err(missing());
    }

    Ok(ShareSnapshot {
        code: d.code.clone(),
        reference_date: d.current_period_end,
        net_shares,
        equity: record.value(MetricField::Equity),
    })
}

/// Product of adjustment factors for `code` over (reference_date, as_of],
/// in ascending date order.
///
/// Returns exactly 1.0 when the window is empty or carries no factor data
/// at all. A window where factors are only partly present, or any factor
/// is not strictly positive, is an error rather than a guess.
pub fn cumulative_adjustment_factor(
    prices: &[PriceObservation],
    code: &str,
    reference_date: NaiveDate,
    as_of: NaiveDate,
) -> Result<f64, ShareBasisError> {
    let mut window: Vec<&PriceObservation> = prices
        .iter()
        .filter(|p| p.code == code && p.date > reference_date && p.date <= as_of)
        .collect();
    window.sort_by_key(|p| p.date);

    if window.iter().all(|p| p.adjustment_factor.is_none()) {
        return Ok(1.0);
    }

    window.iter().try_fold(1.0_f64, |caf, p| match p.adjustment_factor {
        None => Err(ShareBasisError::MissingFactor {
            code: code.to_string(),
            date: p.date,
        }),
        Some(factor) if !factor.is_finite() || factor <= 0.0 => {
            Err(ShareBasisError::NonPositiveFactor {
                code: code.to_string(),
                date: p.date,
                factor,
            })
        }
        Some(factor) => Ok(caf * factor),
    })
}

/// Convert a snapshot's raw share count onto the basis of prices at `as_of`
pub fn latest_basis_shares(snapshot: &ShareSnapshot, caf: f64) -> f64 {
    snapshot.net_shares / caf
}

/// Full reconciliation of the record's share count up to `as_of`
pub fn reconcile_shares(
    record: &CanonicalFyRecord,
    prices: &[PriceObservation],
    as_of: NaiveDate,
) -> Result<ShareReconciliation, ShareBasisError> {
    let snapshot = shares_at(record)?;
    let caf = cumulative_adjustment_factor(prices, &snapshot.code, snapshot.reference_date, as_of)?;
    let latest = latest_basis_shares(&snapshot, caf);

    Ok(ShareReconciliation {
        snapshot,
        as_of,
        cumulative_adjustment_factor: caf,
        latest_basis_shares: latest,
    })
}

/// Latest adjusted close on or before `as_of`, at most `max_staleness_days` old
pub fn adjusted_price_as_of(
    prices: &[PriceObservation],
    code: &str,
    as_of: NaiveDate,
    max_staleness_days: i64,
) -> Result<(NaiveDate, f64), ShareBasisError> {
    prices
        .iter()
        .filter(|p| p.code == code && p.date <= as_of)
        .filter(|p| (as_of - p.date).num_days() <= max_staleness_days)
        .filter_map(|p| p.adjusted_close.filter(|c| c.is_finite() && *c > 0.0).map(|c| (p.date, c)))
        .max_by_key(|(date, _)| *date)
        .ok_or_else(|| ShareBasisError::MissingPrice {
            code: code.to_string(),
            as_of,
            max_staleness_days,
        })
}
