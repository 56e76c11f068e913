use chrono::NaiveDate;
use thiserror::Error;

use crate::models::MetricField;

/// Reasons share reconciliation is skipped for one code at one as-of date.
/// None of these abort a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShareBasisError {
    #[error("adjustment factor missing for {code} on {date}")]
    MissingFactor { code: String, date: NaiveDate },

    #[error("non-positive adjustment factor {factor} for {code} on {date}")]
    NonPositiveFactor {
        code: String,
        date: NaiveDate,
        factor: f64,
    },

    #[error("no shares outstanding reported for {code} (period end {period_end})")]
    MissingShares { code: String, period_end: NaiveDate },

    #[error("no adjusted price for {code} within {max_staleness_days} days of {as_of}")]
    MissingPrice {
        code: String,
        as_of: NaiveDate,
        max_staleness_days: i64,
    },
}

#[derive(Debug, Error)]
pub enum ValuationError {
    /// No qualifying FY disclosure yet; the feature row is omitted
    #[error("no qualifying FY disclosure for {code} as of {as_of}")]
    MissingFyData { code: String, as_of: NaiveDate },

    /// Field still null after sibling and quarterly passes
    #[error("{field} for {code} as of {as_of} is null after imputation")]
    FieldImputationExhausted {
        code: String,
        as_of: NaiveDate,
        field: MetricField,
    },

    #[error("share basis unavailable: {0}")]
    ShareBasis(#[from] ShareBasisError),

    /// The backing store failed; the whole batch is abandoned
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ValuationError {
    /// Only store failures abort a batch; everything else degrades per code
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, ValuationError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for ValuationError {
    fn from(err: sqlx::Error) -> Self {
        ValuationError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ValuationError {
    fn from(err: serde_json::Error) -> Self {
        ValuationError::StoreUnavailable(format!("provenance encoding: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ValuationError>;
