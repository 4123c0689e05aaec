//! Rebalancing strategy.
//!
//! Contains the core logic for:
//! - Margin delta between target and committed exposure
//! - Margin-budgeted volume search over the tradable grid
//! - Cancel-then-open order reconciliation with bounded retries

pub mod delta;
pub mod reconcile;
pub mod search;

pub use delta::{committed_margin, plan_instrument, CommittedMargin, InstrumentPlan};
pub use reconcile::{
    cancel_phase, open_phase, with_retries, CancelSummary, OpenRequest, OpenSummary, RetryOutcome,
    RetryPolicy,
};
pub use search::{search_volume, HostMarginOracle, MarginOracle, SearchKind, VolumeDomain, VolumeSearch};
