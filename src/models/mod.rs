use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Accounting period a disclosure reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    #[serde(rename = "FY")]
    Fy,
    #[serde(rename = "1Q")]
    Q1,
    #[serde(rename = "2Q")]
    Q2,
    #[serde(rename = "3Q")]
    Q3,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Fy => "FY",
            PeriodType::Q1 => "1Q",
            PeriodType::Q2 => "2Q",
            PeriodType::Q3 => "3Q",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "FY" => Some(PeriodType::Fy),
            "1Q" => Some(PeriodType::Q1),
            "2Q" => Some(PeriodType::Q2),
            "3Q" => Some(PeriodType::Q3),
            _ => None,
        }
    }

    pub fn is_quarterly(&self) -> bool {
        !matches!(self, PeriodType::Fy)
    }

    /// Rank among quarterly disclosures filed on the same day (3Q first)
    pub fn quarter_rank(&self) -> u8 {
        match self {
            PeriodType::Q3 => 3,
            PeriodType::Q2 => 2,
            PeriodType::Q1 => 1,
            PeriodType::Fy => 0,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a disclosure row; doubles as the provenance reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisclosureKey {
    pub code: String,
    pub disclosed_date: NaiveDate,
    pub period_type: PeriodType,
    pub current_period_end: NaiveDate,
}

impl fmt::Display for DisclosureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.code, self.disclosed_date, self.period_type, self.current_period_end
        )
    }
}

/// Raw financial disclosure as received from the data provider. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disclosure {
    pub code: String,
    pub disclosed_date: NaiveDate,
    pub disclosed_time: Option<NaiveTime>,
    pub period_type: PeriodType,
    pub current_period_end: NaiveDate,
    pub operating_profit: Option<f64>,
    pub profit: Option<f64>,
    pub equity: Option<f64>,
    pub eps: Option<f64>,
    pub bvps: Option<f64>,
    pub forecast_operating_profit: Option<f64>,
    pub forecast_profit: Option<f64>,
    pub forecast_eps: Option<f64>,
    pub next_year_forecast_operating_profit: Option<f64>,
    pub next_year_forecast_profit: Option<f64>,
    pub next_year_forecast_eps: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub treasury_shares: Option<f64>,
}

impl Disclosure {
    /// Empty disclosure; callers fill the fields they have
    pub fn new(
        code: &str,
        disclosed_date: NaiveDate,
        period_type: PeriodType,
        current_period_end: NaiveDate,
    ) -> Self {
        Self {
            code: code.to_string(),
            disclosed_date,
            disclosed_time: None,
            period_type,
            current_period_end,
            operating_profit: None,
            profit: None,
            equity: None,
            eps: None,
            bvps: None,
            forecast_operating_profit: None,
            forecast_profit: None,
            forecast_eps: None,
            next_year_forecast_operating_profit: None,
            next_year_forecast_profit: None,
            next_year_forecast_eps: None,
            shares_outstanding: None,
            treasury_shares: None,
        }
    }

    pub fn key(&self) -> DisclosureKey {
        DisclosureKey {
            code: self.code.clone(),
            disclosed_date: self.disclosed_date,
            period_type: self.period_type,
            current_period_end: self.current_period_end,
        }
    }
}

/// Daily split/allocation-adjusted price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub code: String,
    pub date: NaiveDate,
    pub adjusted_close: Option<f64>,
    /// Ratio applied on this day for splits/allocations; 1.0 on ordinary days
    pub adjustment_factor: Option<f64>,
}

/// The fields the imputer fills. Each field pairs an actual accessor with
/// its forecast counterpart; the slot decides which of the two the
/// selected record itself is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    OperatingProfit,
    Profit,
    Equity,
    Eps,
    Bvps,
    ForecastOperatingProfit,
    ForecastProfit,
    ForecastEps,
}

impl MetricField {
    pub const ALL: [MetricField; 8] = [
        MetricField::OperatingProfit,
        MetricField::Profit,
        MetricField::Equity,
        MetricField::Eps,
        MetricField::Bvps,
        MetricField::ForecastOperatingProfit,
        MetricField::ForecastProfit,
        MetricField::ForecastEps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricField::OperatingProfit => "operating_profit",
            MetricField::Profit => "profit",
            MetricField::Equity => "equity",
            MetricField::Eps => "eps",
            MetricField::Bvps => "bvps",
            MetricField::ForecastOperatingProfit => "forecast_operating_profit",
            MetricField::ForecastProfit => "forecast_profit",
            MetricField::ForecastEps => "forecast_eps",
        }
    }

    pub fn is_forecast_slot(&self) -> bool {
        matches!(
            self,
            MetricField::ForecastOperatingProfit | MetricField::ForecastProfit | MetricField::ForecastEps
        )
    }

    /// Actual-kind value of this field's measure in `d`
    pub fn actual_in(&self, d: &Disclosure) -> Option<f64> {
        match self {
            MetricField::OperatingProfit | MetricField::ForecastOperatingProfit => d.operating_profit,
            MetricField::Profit | MetricField::ForecastProfit => d.profit,
            MetricField::Equity => d.equity,
            MetricField::Eps | MetricField::ForecastEps => d.eps,
            MetricField::Bvps => d.bvps,
        }
    }

    /// Forecast-kind value of this field's measure in `d`
    pub fn forecast_in(&self, d: &Disclosure) -> Option<f64> {
        match self {
            MetricField::OperatingProfit | MetricField::ForecastOperatingProfit => {
                d.forecast_operating_profit
            }
            MetricField::Profit | MetricField::ForecastProfit => d.forecast_profit,
            MetricField::Eps | MetricField::ForecastEps => d.forecast_eps,
            MetricField::Equity | MetricField::Bvps => None,
        }
    }

    /// Value stored directly in this field's own slot
    pub fn own_value(&self, d: &Disclosure) -> Option<f64> {
        if self.is_forecast_slot() {
            self.forecast_in(d)
        } else {
            self.actual_in(d)
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of value a source disclosure exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Actual,
    Forecast,
}

/// Where a canonical field's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSource {
    /// Reported as an actual in the selected disclosure
    Actual,
    /// Reported as a forecast in the selected disclosure
    Forecast,
    /// Copied from another FY disclosure of the same accounting period
    SiblingImputed { from: ValueKind },
    /// Taken from an earlier quarterly disclosure
    QuarterlyImputed { from: ValueKind },
    /// No source had a value
    Missing,
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Actual => f.write_str("actual"),
            FieldSource::Forecast => f.write_str("forecast"),
            FieldSource::SiblingImputed { .. } => f.write_str("sibling-imputed"),
            FieldSource::QuarterlyImputed { from: ValueKind::Actual } => {
                f.write_str("quarterly-imputed (actual)")
            }
            FieldSource::QuarterlyImputed { from: ValueKind::Forecast } => {
                f.write_str("quarterly-imputed (forecast)")
            }
            FieldSource::Missing => f.write_str("missing"),
        }
    }
}

/// A derived field value together with its origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub value: Option<f64>,
    pub source: FieldSource,
    pub source_disclosure: Option<DisclosureKey>,
}

impl FieldProvenance {
    pub fn missing() -> Self {
        Self {
            value: None,
            source: FieldSource::Missing,
            source_disclosure: None,
        }
    }
}

/// The one FY disclosure chosen for (code, as_of), with every imputable
/// field resolved and tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFyRecord {
    pub as_of: NaiveDate,
    pub disclosure: Disclosure,
    pub fields: BTreeMap<MetricField, FieldProvenance>,
}

impl CanonicalFyRecord {
    pub fn code(&self) -> &str {
        &self.disclosure.code
    }

    pub fn field(&self, field: MetricField) -> Option<&FieldProvenance> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: MetricField) -> Option<f64> {
        self.field(field).and_then(|p| p.value)
    }

    pub fn source(&self, field: MetricField) -> FieldSource {
        self.field(field)
            .map(|p| p.source)
            .unwrap_or(FieldSource::Missing)
    }

    /// Fields that stayed null after both imputation passes
    pub fn exhausted_fields(&self) -> Vec<MetricField> {
        self.fields
            .iter()
            .filter(|(_, p)| p.value.is_none())
            .map(|(f, _)| *f)
            .collect()
    }
}

/// Which forecast fed the forward PER denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    CurrentYear,
    NextYear,
}

impl ForecastSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastSource::CurrentYear => "current_year",
            ForecastSource::NextYear => "next_year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "current_year" => Some(ForecastSource::CurrentYear),
            "next_year" => Some(ForecastSource::NextYear),
            _ => None,
        }
    }
}

/// One materialized row of the feature table, keyed by (as_of_date, code)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationFeature {
    pub code: String,
    pub as_of_date: NaiveDate,
    pub adjusted_price: Option<f64>,
    pub latest_basis_shares: Option<f64>,
    pub cumulative_adjustment_factor: Option<f64>,
    pub market_cap: Option<f64>,
    pub per: Option<f64>,
    pub forward_per: Option<f64>,
    pub pbr: Option<f64>,
    pub fy_period_end: NaiveDate,
    pub fy_disclosed_date: NaiveDate,
    pub forecast_source: Option<ForecastSource>,
    pub provenance: BTreeMap<MetricField, FieldProvenance>,
}

/// Bookkeeping row written alongside each materialized snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRun {
    pub as_of_date: NaiveDate,
    pub rows_written: i64,
    pub rows_omitted: i64,
    pub completed_at: DateTime<Utc>,
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub max_concurrency: usize,
    pub max_price_staleness_days: i64,
    pub consistency_tolerance: f64,
    pub next_year_forecast_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "db/features.db".to_string(),
            max_concurrency: 8,
            max_price_staleness_days: 10,
            consistency_tolerance: 1e-6,
            next_year_forecast_fallback: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();
        Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            max_concurrency: std::env::var("MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrency),
            max_price_staleness_days: std::env::var("MAX_PRICE_STALENESS_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_price_staleness_days),
            consistency_tolerance: std::env::var("CONSISTENCY_TOLERANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.consistency_tolerance),
            next_year_forecast_fallback: std::env::var("NEXT_YEAR_FORECAST_FALLBACK")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.next_year_forecast_fallback),
        }
    }
}
