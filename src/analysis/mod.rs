pub mod cross_imputer;
pub mod fy_selector;
pub mod share_reconciler;
pub mod valuation;

pub use cross_imputer::build_canonical_record;
pub use fy_selector::select_canonical_fy;
pub use share_reconciler::{
    adjusted_price_as_of, cumulative_adjustment_factor, latest_basis_shares, reconcile_shares,
    shares_at, ShareReconciliation, ShareSnapshot,
};
pub use valuation::{calculate_ratios, check_consistency, ConsistencyReport, ValuationRatios};
