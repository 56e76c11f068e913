use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::database_sqlx::DatabaseManagerSqlx;
use crate::models::{Disclosure, PeriodType, PriceObservation};

/// One row of a statements export (J-Quants `/fins/statements` column names)
#[derive(Debug, Deserialize)]
struct StatementRow {
    #[serde(rename = "LocalCode")]
    code: String,
    #[serde(rename = "DisclosedDate")]
    disclosed_date: String,
    #[serde(rename = "DisclosedTime", default)]
    disclosed_time: Option<String>,
    #[serde(rename = "TypeOfCurrentPeriod")]
    period_type: String,
    #[serde(rename = "CurrentPeriodEndDate")]
    current_period_end: String,
    #[serde(rename = "OperatingProfit", default)]
    operating_profit: Option<String>,
    #[serde(rename = "Profit", default)]
    profit: Option<String>,
    #[serde(rename = "Equity", default)]
    equity: Option<String>,
    #[serde(rename = "EarningsPerShare", default)]
    eps: Option<String>,
    #[serde(rename = "BookValuePerShare", default)]
    bvps: Option<String>,
    #[serde(rename = "ForecastOperatingProfit", default)]
    forecast_operating_profit: Option<String>,
    #[serde(rename = "ForecastProfit", default)]
    forecast_profit: Option<String>,
    #[serde(rename = "ForecastEarningsPerShare", default)]
    forecast_eps: Option<String>,
    #[serde(rename = "NextYearForecastOperatingProfit", default)]
    next_year_forecast_operating_profit: Option<String>,
    #[serde(rename = "NextYearForecastProfit", default)]
    next_year_forecast_profit: Option<String>,
    #[serde(rename = "NextYearForecastEarningsPerShare", default)]
    next_year_forecast_eps: Option<String>,
    #[serde(
        rename = "NumberOfIssuedAndOutstandingSharesAtTheEndOfFiscalYearIncludingTreasuryStock",
        default
    )]
    shares_outstanding: Option<String>,
    #[serde(rename = "NumberOfTreasuryStockAtTheEndOfFiscalYear", default)]
    treasury_shares: Option<String>,
}

/// One row of a daily quotes export
#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "AdjustmentClose", default)]
    adjusted_close: Option<String>,
    #[serde(rename = "AdjustmentFactor", default)]
    adjustment_factor: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportStats {
    pub rows_read: usize,
    pub rows_imported: usize,
    /// Unparseable rows and period types outside FY/1Q/2Q/3Q
    pub rows_skipped: usize,
}

/// Parse optional string field to f64
fn parse_optional_f64(value: &Option<String>) -> Option<f64> {
    value.as_ref().and_then(|s| {
        let s = s.trim();
        if s.is_empty() || s == "-" {
            None
        } else {
            s.replace(',', "").parse().ok()
        }
    })
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .map_err(|e| anyhow!("bad date '{}': {}", value, e))
}

fn parse_time(value: &Option<String>) -> Option<NaiveTime> {
    let value = value.as_deref()?.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn statement_to_disclosure(row: &StatementRow) -> Result<Option<Disclosure>> {
    let Some(period_type) = PeriodType::parse(&row.period_type) else {
        return Ok(None);
    };

    Ok(Some(Disclosure {
        code: row.code.trim().to_string(),
        disclosed_date: parse_date(&row.disclosed_date)?,
        disclosed_time: parse_time(&row.disclosed_time),
        period_type,
        current_period_end: parse_date(&row.current_period_end)?,
        operating_profit: parse_optional_f64(&row.operating_profit),
        profit: parse_optional_f64(&row.profit),
        equity: parse_optional_f64(&row.equity),
        eps: parse_optional_f64(&row.eps),
        bvps: parse_optional_f64(&row.bvps),
        forecast_operating_profit: parse_optional_f64(&row.forecast_operating_profit),
        forecast_profit: parse_optional_f64(&row.forecast_profit),
        forecast_eps: parse_optional_f64(&row.forecast_eps),
        next_year_forecast_operating_profit: parse_optional_f64(&row.next_year_forecast_operating_profit),
        next_year_forecast_profit: parse_optional_f64(&row.next_year_forecast_profit),
        next_year_forecast_eps: parse_optional_f64(&row.next_year_forecast_eps),
        shares_outstanding: parse_optional_f64(&row.shares_outstanding),
        treasury_shares: parse_optional_f64(&row.treasury_shares),
    }))
}

/// Parse a statements CSV. Bad rows are counted and skipped.
pub fn parse_disclosures<R: Read>(reader: R) -> Result<(Vec<Disclosure>, ImportStats)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut stats = ImportStats::default();
    let mut disclosures = Vec::new();

    for (row_num, result) in rdr.deserialize::<StatementRow>().enumerate() {
        stats.rows_read += 1;
        let parsed = result
            .map_err(anyhow::Error::from)
            .and_then(|row| statement_to_disclosure(&row));
        match parsed {
            Ok(Some(d)) => disclosures.push(d),
            Ok(None) => stats.rows_skipped += 1,
            Err(e) => {
                warn!("Skipping statements row {}: {}", row_num + 1, e);
                stats.rows_skipped += 1;
            }
        }
    }

    stats.rows_imported = disclosures.len();
    Ok((disclosures, stats))
}

/// Parse a daily quotes CSV. Bad rows are counted and skipped.
pub fn parse_prices<R: Read>(reader: R) -> Result<(Vec<PriceObservation>, ImportStats)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut stats = ImportStats::default();
    let mut prices = Vec::new();

    for (row_num, result) in rdr.deserialize::<PriceRow>().enumerate() {
        stats.rows_read += 1;
        let parsed = result.map_err(anyhow::Error::from).and_then(|row| {
            Ok(PriceObservation {
                code: row.code.trim().to_string(),
                date: parse_date(&row.date)?,
                adjusted_close: parse_optional_f64(&row.adjusted_close),
                adjustment_factor: parse_optional_f64(&row.adjustment_factor),
            })
        });
        match parsed {
            Ok(p) => prices.push(p),
            Err(e) => {
                warn!("Skipping quotes row {}: {}", row_num + 1, e);
                stats.rows_skipped += 1;
            }
        }
    }

    stats.rows_imported = prices.len();
    Ok((prices, stats))
}

fn open_csv(csv_path: &str) -> Result<std::fs::File> {
    let path = Path::new(csv_path);
    if !path.exists() {
        return Err(anyhow!("CSV file not found: {}", csv_path));
    }
    Ok(std::fs::File::open(path)?)
}

/// Import a statements CSV into the disclosures table (one transaction)
pub async fn import_disclosures(db: &DatabaseManagerSqlx, csv_path: &str) -> Result<ImportStats> {
    info!("Importing disclosures from {}", csv_path);
    let (disclosures, stats) = parse_disclosures(open_csv(csv_path)?)?;
    db.upsert_disclosures(&disclosures).await?;
    info!(
        "Imported {} disclosures ({} skipped)",
        stats.rows_imported, stats.rows_skipped
    );
    Ok(stats)
}

/// Import a daily quotes CSV into the price_observations table (one transaction)
pub async fn import_prices(db: &DatabaseManagerSqlx, csv_path: &str) -> Result<ImportStats> {
    info!("Importing prices from {}", csv_path);
    let (prices, stats) = parse_prices(open_csv(csv_path)?)?;
    db.upsert_prices(&prices).await?;
    info!("Imported {} prices ({} skipped)", stats.rows_imported, stats.rows_skipped);
    Ok(stats)
}
