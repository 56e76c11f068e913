//! Point-in-time feature pipeline.
//!
//! For one as-of date every code is valued independently (selection,
//! imputation, share reconciliation, ratios) and the resulting rows replace
//! the stored snapshot for that date in a single transaction.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{
    adjusted_price_as_of, build_canonical_record, calculate_ratios, check_consistency,
    reconcile_shares, select_canonical_fy, shares_at, ConsistencyReport, ShareReconciliation,
    ShareSnapshot,
};
use crate::analysis::valuation::build_feature;
use crate::errors::{Result, ShareBasisError, ValuationError};
use crate::models::{
    CanonicalFyRecord, Config, Disclosure, FieldSource, MetricField, PriceObservation,
    ValuationFeature,
};
use crate::store::{FeatureSink, StatementStore};

/// Everything derived for one code at one as-of date
#[derive(Debug, Clone)]
pub struct CodeValuation {
    pub record: CanonicalFyRecord,
    pub shares: Option<ShareReconciliation>,
    pub share_basis_error: Option<ShareBasisError>,
    pub consistency: ConsistencyReport,
    pub feature: ValuationFeature,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializationStats {
    pub codes_considered: usize,
    pub rows_written: usize,
    pub rows_omitted: usize,
    pub share_basis_failures: usize,
    pub imputed_fields: usize,
    pub exhausted_fields: usize,
    pub oracle_mismatches: usize,
}

/// Canonical record for `code` as of `as_of`, from rows already loaded.
/// `MissingFyData` when nothing qualifies yet.
pub fn canonical_record(
    code: &str,
    disclosures: &[Disclosure],
    as_of: NaiveDate,
) -> Result<CanonicalFyRecord> {
    let selected = select_canonical_fy(disclosures, code, as_of).ok_or_else(|| {
        ValuationError::MissingFyData {
            code: code.to_string(),
            as_of,
        }
    })?;
    Ok(build_canonical_record(selected, disclosures, as_of))
}

/// Value one code from its disclosure and price history. Pure; the same
/// inputs always give the same row.
pub fn value_code_from_history(
    code: &str,
    disclosures: &[Disclosure],
    prices: &[PriceObservation],
    as_of: NaiveDate,
    config: &Config,
) -> Result<CodeValuation> {
    let record = canonical_record(code, disclosures, as_of)?;

    for field in record.exhausted_fields() {
        let exhausted = ValuationError::FieldImputationExhausted {
            code: code.to_string(),
            as_of,
            field,
        };
        debug!("{}", exhausted);
    }

    let price = adjusted_price_as_of(prices, code, as_of, config.max_price_staleness_days);
    let shares = reconcile_shares(&record, prices, as_of);

    let share_basis_error = match (&price, &shares) {
        (Err(e), _) | (_, Err(e)) => Some(e.clone()),
        _ => None,
    };
    if let Some(e) = &share_basis_error {
        warn!(code, %as_of, "skipping share reconciliation: {}", e);
    }

    let adjusted_price = price.ok().map(|(_, p)| p);
    let shares = shares.ok();

    let ratios = calculate_ratios(
        &record,
        adjusted_price,
        shares.as_ref(),
        config.next_year_forecast_fallback,
    );
    let consistency = check_consistency(&record, adjusted_price, &ratios);
    if !consistency.is_consistent(config.consistency_tolerance) {
        debug!(code, %as_of, ?consistency, "market-cap ratios disagree with per-share ratios");
    }

    let feature = build_feature(&record, as_of, adjusted_price, shares.as_ref(), &ratios);

    Ok(CodeValuation {
        record,
        shares,
        share_basis_error,
        consistency,
        feature,
    })
}

/// Load one code's history from the store (bounded by `as_of`) and value it
pub async fn value_code<S: StatementStore + ?Sized>(
    store: &S,
    code: &str,
    as_of: NaiveDate,
    config: &Config,
) -> Result<CodeValuation> {
    let disclosures = store.disclosures_as_of(code, as_of).await?;
    let prices = store.prices_as_of(code, as_of).await?;
    value_code_from_history(code, &disclosures, &prices, as_of, config)
}

/// Net shares and equity from the canonical record effective at `date`
pub async fn shares_at_date<S: StatementStore + ?Sized>(
    store: &S,
    code: &str,
    date: NaiveDate,
) -> Result<ShareSnapshot> {
    let disclosures = store.disclosures_as_of(code, date).await?;
    let record = canonical_record(code, &disclosures, date)?;
    Ok(shares_at(&record)?)
}

/// Compute and atomically persist the feature snapshot for `as_of`.
///
/// Per-code problems (no FY data, missing share basis, unfillable fields)
/// only omit or blank that code. A store failure aborts before anything is
/// written, so the previous snapshot for `as_of` survives.
pub async fn materialize_as_of<S, K>(
    store: &S,
    sink: &K,
    as_of: NaiveDate,
    config: &Config,
) -> Result<MaterializationStats>
where
    S: StatementStore + ?Sized,
    K: FeatureSink + ?Sized,
{
    let codes = store.codes_as_of(as_of).await?;
    info!("Materializing {} codes as of {}", codes.len(), as_of);

    let mut stats = MaterializationStats {
        codes_considered: codes.len(),
        ..Default::default()
    };

    let outcomes: Vec<(String, Result<CodeValuation>)> = stream::iter(codes)
        .map(|code| async move {
            let outcome = value_code(store, &code, as_of, config).await;
            (code, outcome)
        })
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    let mut rows = Vec::with_capacity(outcomes.len());
    for (code, outcome) in outcomes {
        match outcome {
            Ok(valuation) => {
                if valuation.share_basis_error.is_some() {
                    stats.share_basis_failures += 1;
                }
                if !valuation.consistency.is_consistent(config.consistency_tolerance) {
                    stats.oracle_mismatches += 1;
                }
                for provenance in valuation.record.fields.values() {
                    match provenance.source {
                        FieldSource::SiblingImputed { .. } | FieldSource::QuarterlyImputed { .. } => {
                            stats.imputed_fields += 1
                        }
                        FieldSource::Missing => stats.exhausted_fields += 1,
                        FieldSource::Actual | FieldSource::Forecast => {}
                    }
                }
                rows.push(valuation.feature);
            }
            Err(e) if e.is_batch_fatal() => {
                warn!("Aborting batch for {} at {}: {}", as_of, code, e);
                return Err(e);
            }
            Err(e) => {
                debug!("Omitting {}: {}", code, e);
                stats.rows_omitted += 1;
            }
        }
    }

    // completion order is arbitrary; the stored snapshot must not be
    rows.sort_by(|a, b| a.code.cmp(&b.code));

    sink.replace_features(as_of, &rows, stats.rows_omitted).await?;
    stats.rows_written = rows.len();

    info!(
        "Materialized {} rows for {} ({} omitted, {} without share basis, {} imputed fields)",
        stats.rows_written, as_of, stats.rows_omitted, stats.share_basis_failures, stats.imputed_fields
    );
    Ok(stats)
}

/// Fields on the record that were filled from somewhere other than the selected filing
pub fn imputed_fields(record: &CanonicalFyRecord) -> Vec<MetricField> {
    record
        .fields
        .iter()
        .filter(|(_, p)| {
            matches!(
                p.source,
                FieldSource::SiblingImputed { .. } | FieldSource::QuarterlyImputed { .. }
            )
        })
        .map(|(f, _)| *f)
        .collect()
}
