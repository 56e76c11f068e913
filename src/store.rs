//! Storage seams for the pipeline.
//!
//! Reads are always bounded by an as-of date: an implementation must never
//! return a disclosure with `disclosed_date > as_of` or a price with
//! `date > as_of`. The pipeline re-filters anyway.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::Result;
use crate::models::{Disclosure, PriceObservation, ValuationFeature};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Codes with at least one disclosure on or before `as_of`
    async fn codes_as_of(&self, as_of: NaiveDate) -> Result<Vec<String>>;

    /// All disclosures (FY and quarterly) for `code` disclosed on or before `as_of`
    async fn disclosures_as_of(&self, code: &str, as_of: NaiveDate) -> Result<Vec<Disclosure>>;

    /// Price observations for `code` dated on or before `as_of`
    async fn prices_as_of(&self, code: &str, as_of: NaiveDate) -> Result<Vec<PriceObservation>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeatureSink: Send + Sync {
    /// Replace every row for `as_of` with `rows` in one transaction.
    /// On error the previous snapshot for `as_of` must be left intact.
    async fn replace_features(
        &self,
        as_of: NaiveDate,
        rows: &[ValuationFeature],
        rows_omitted: usize,
    ) -> Result<()>;
}
