use chrono::{NaiveDate, NaiveTime};
use std::collections::HashMap;

use crate::models::{Disclosure, PeriodType};

/// Ordering key for FY candidates. The greatest key is canonical:
/// latest accounting period first, then latest filing date, then latest
/// filing time. A disclosure without a time sorts before one with a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SelectionKey {
    pub current_period_end: NaiveDate,
    pub disclosed_date: NaiveDate,
    pub disclosed_time: Option<NaiveTime>,
}

impl SelectionKey {
    pub fn of(d: &Disclosure) -> Self {
        Self {
            current_period_end: d.current_period_end,
            disclosed_date: d.disclosed_date,
            disclosed_time: d.disclosed_time,
        }
    }
}

/// An FY disclosure counts only if it carries at least one headline figure
pub fn has_headline_figures(d: &Disclosure) -> bool {
    [
        d.operating_profit,
        d.profit,
        d.equity,
        d.forecast_operating_profit,
        d.forecast_profit,
        d.forecast_eps,
    ]
    .iter()
    .any(Option::is_some)
}

/// FY disclosures for `code` visible at `as_of` that qualify for selection
pub fn qualifying_candidates<'a>(
    disclosures: &'a [Disclosure],
    code: &str,
    as_of: NaiveDate,
) -> impl Iterator<Item = &'a Disclosure> + 'a {
    let code = code.to_string();
    disclosures.iter().filter(move |d| {
        d.code == code
            && d.period_type == PeriodType::Fy
            && d.disclosed_date <= as_of
            && has_headline_figures(d)
    })
}

/// Latest filing per accounting period. A restatement supersedes earlier
/// filings for the same `current_period_end`.
pub fn period_survivors<'a>(
    disclosures: &'a [Disclosure],
    code: &str,
    as_of: NaiveDate,
) -> Vec<&'a Disclosure> {
    let mut by_period: HashMap<NaiveDate, &Disclosure> = HashMap::new();
    for d in qualifying_candidates(disclosures, code, as_of) {
        by_period
            .entry(d.current_period_end)
            .and_modify(|kept| {
                if SelectionKey::of(d) > SelectionKey::of(kept) {
                    *kept = d;
                }
            })
            .or_insert(d);
    }

    let mut survivors: Vec<&Disclosure> = by_period.into_values().collect();
    survivors.sort_by_key(|d| SelectionKey::of(d));
    survivors
}

/// Pick the canonical FY disclosure for `code` as of `as_of`.
///
/// `None` means no FY data is available yet, which is a normal outcome.
/// Nothing disclosed after `as_of` is looked at, whatever the caller passes in.
pub fn select_canonical_fy<'a>(
    disclosures: &'a [Disclosure],
    code: &str,
    as_of: NaiveDate,
) -> Option<&'a Disclosure> {
    period_survivors(disclosures, code, as_of)
        .into_iter()
        .max_by_key(|d| SelectionKey::of(d))
}
