use chrono::NaiveDate;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::models::{
    CanonicalFyRecord, Disclosure, FieldProvenance, FieldSource, MetricField, PeriodType, ValueKind,
};

/// Source tiers consulted for a missing field, highest priority first.
/// Within a tier an actual value outranks a forecast value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Sibling,
    Quarterly,
}

impl Tier {
    fn tag(&self, kind: ValueKind) -> FieldSource {
        match self {
            Tier::Sibling => FieldSource::SiblingImputed { from: kind },
            Tier::Quarterly => FieldSource::QuarterlyImputed { from: kind },
        }
    }
}

/// Other FY filings for the selected record's accounting period, newest first.
/// A same-day filing at a different time is a sibling, not the selected row.
fn sibling_candidates<'a>(
    selected: &Disclosure,
    disclosures: &'a [Disclosure],
    as_of: NaiveDate,
) -> Vec<&'a Disclosure> {
    let selected_id = (selected.key(), selected.disclosed_time);
    let mut siblings: Vec<&Disclosure> = disclosures
        .iter()
        .filter(|d| {
            d.code == selected.code
                && d.period_type == PeriodType::Fy
                && d.current_period_end == selected.current_period_end
                && d.disclosed_date <= as_of
                && (d.key(), d.disclosed_time) != selected_id
        })
        .collect();
    siblings.sort_by_key(|d| Reverse((d.disclosed_date, d.disclosed_time)));
    siblings
}

/// Quarterly filings made strictly before the selected FY filing, newest
/// first; on the same day 3Q beats 2Q beats 1Q.
fn quarterly_candidates<'a>(
    selected: &Disclosure,
    disclosures: &'a [Disclosure],
    as_of: NaiveDate,
) -> Vec<&'a Disclosure> {
    let mut quarterlies: Vec<&Disclosure> = disclosures
        .iter()
        .filter(|d| {
            d.code == selected.code
                && d.period_type.is_quarterly()
                && d.disclosed_date < selected.disclosed_date
                && d.disclosed_date <= as_of
        })
        .collect();
    quarterlies.sort_by_key(|d| {
        Reverse((d.disclosed_date, d.period_type.quarter_rank(), d.disclosed_time))
    });
    quarterlies
}

fn first_in_tier(
    tier: Tier,
    candidates: &[&Disclosure],
    field: MetricField,
) -> Option<FieldProvenance> {
    let pick = |kind: ValueKind| {
        candidates.iter().find_map(|d| {
            let value = match kind {
                ValueKind::Actual => field.actual_in(d),
                ValueKind::Forecast => field.forecast_in(d),
            };
            value.map(|v| FieldProvenance {
                value: Some(v),
                source: tier.tag(kind),
                source_disclosure: Some(d.key()),
            })
        })
    };

    pick(ValueKind::Actual).or_else(|| pick(ValueKind::Forecast))
}

/// Resolve one field: the selected record's own slot, then siblings, then
/// earlier quarterlies. Quarterlies are only consulted if no sibling has
/// any value for the field.
fn resolve_field(
    field: MetricField,
    selected: &Disclosure,
    siblings: &[&Disclosure],
    quarterlies: &[&Disclosure],
) -> FieldProvenance {
    if let Some(value) = field.own_value(selected) {
        return FieldProvenance {
            value: Some(value),
            source: if field.is_forecast_slot() {
                FieldSource::Forecast
            } else {
                FieldSource::Actual
            },
            source_disclosure: Some(selected.key()),
        };
    }

    first_in_tier(Tier::Sibling, siblings, field)
        .or_else(|| first_in_tier(Tier::Quarterly, quarterlies, field))
        .unwrap_or_else(FieldProvenance::missing)
}

/// Build the canonical record for an already selected FY disclosure.
///
/// `disclosures` may hold anything for the code; rows disclosed after
/// `as_of` are filtered out here as well as by the store.
pub fn build_canonical_record(
    selected: &Disclosure,
    disclosures: &[Disclosure],
    as_of: NaiveDate,
) -> CanonicalFyRecord {
    let siblings = sibling_candidates(selected, disclosures, as_of);
    let quarterlies = quarterly_candidates(selected, disclosures, as_of);

    let fields: BTreeMap<MetricField, FieldProvenance> = MetricField::ALL
        .iter()
        .map(|&field| (field, resolve_field(field, selected, &siblings, &quarterlies)))
        .collect();

    CanonicalFyRecord {
        as_of,
        disclosure: selected.clone(),
        fields,
    }
}
