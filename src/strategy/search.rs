//! Margin-budgeted volume search.
//!
//! The margin oracle is monotonically non-decreasing in volume but generally
//! non-linear (leverage tiers, contract size, spread, minimum charges), so the
//! largest volume that fits a budget is found by bisection over the tradable
//! volume grid rather than by inverting a formula.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::exchange::{OrderSide, TradingHost};
use crate::utils::decimal::lots_in;

/// Feasibility test for a candidate volume.
#[async_trait]
pub trait MarginOracle: Send + Sync {
    /// Margin for `volume`, `None` when it cannot be priced.
    async fn margin_for(&self, volume: Decimal) -> Option<Decimal>;
}

/// Margin oracle for one instrument and side of a trading host.
pub struct HostMarginOracle<'a, H: ?Sized> {
    host: &'a H,
    instrument: &'a str,
    side: OrderSide,
}

impl<'a, H: TradingHost + ?Sized> HostMarginOracle<'a, H> {
    pub fn new(host: &'a H, instrument: &'a str, side: OrderSide) -> Self {
        Self {
            host,
            instrument,
            side,
        }
    }
}

#[async_trait]
impl<'a, H: TradingHost + ?Sized> MarginOracle for HostMarginOracle<'a, H> {
    async fn margin_for(&self, volume: Decimal) -> Option<Decimal> {
        self.host
            .margin_required(self.instrument, self.side, volume)
            .await
    }
}

/// Tradable volume range on a granularity grid anchored at `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeDomain {
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl VolumeDomain {
    pub fn new(min: Decimal, max: Decimal, step: Decimal) -> Self {
        Self { min, max, step }
    }

    /// Number of whole steps between `min` and the largest grid volume.
    fn span_units(&self) -> Decimal {
        lots_in(self.max - self.min, self.step)
    }

    fn volume_at(&self, units: Decimal) -> Decimal {
        self.min + units * self.step
    }

    fn is_empty(&self) -> bool {
        self.step <= Decimal::ZERO || self.min <= Decimal::ZERO || self.max < self.min
    }
}

/// How the search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchKind {
    /// The whole domain fits; no bisection was needed
    WholeDomain,
    /// Bisection found the largest fitting volume
    Bisected,
    /// Even the minimum volume exceeds the budget
    Infeasible,
    /// The oracle could not price the domain bounds
    Unpriced,
}

/// Chosen volume and the cost of finding it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeSearch {
    /// Zero unless an order should be placed
    pub volume: Decimal,
    pub kind: SearchKind,
    /// Oracle calls made
    pub probes: u32,
}

impl VolumeSearch {
    fn none(kind: SearchKind, probes: u32) -> Self {
        Self {
            volume: Decimal::ZERO,
            kind,
            probes,
        }
    }
}

/// Find the largest grid volume whose margin fits `budget`.
///
/// Probes the domain maximum first (the common case), then the minimum,
/// then bisects between the largest known-feasible and the smallest
/// known-infeasible grid volume. Costs at most
/// `ceil(log2(span / step)) + 2` oracle calls. An unpriceable probe inside
/// the bisection counts as infeasible.
pub async fn search_volume<O: MarginOracle + ?Sized>(
    oracle: &O,
    domain: VolumeDomain,
    budget: Decimal,
) -> VolumeSearch {
    if domain.is_empty() || budget <= Decimal::ZERO {
        return VolumeSearch::none(SearchKind::Infeasible, 0);
    }

    let span = domain.span_units();
    let top = domain.volume_at(span);
    let mut probes = 1;

    match oracle.margin_for(top).await {
        None => return VolumeSearch::none(SearchKind::Unpriced, probes),
        Some(margin) if margin <= budget => {
            return VolumeSearch {
                volume: top,
                kind: SearchKind::WholeDomain,
                probes,
            }
        }
        Some(_) if span.is_zero() => return VolumeSearch::none(SearchKind::Infeasible, probes),
        Some(_) => {}
    }

    probes += 1;
    match oracle.margin_for(domain.min).await {
        None => return VolumeSearch::none(SearchKind::Unpriced, probes),
        Some(margin) if margin > budget => {
            return VolumeSearch::none(SearchKind::Infeasible, probes)
        }
        Some(_) => {}
    }

    // lo fits, hi does not
    let mut lo = Decimal::ZERO;
    let mut hi = span;

    while hi - lo > Decimal::ONE {
        let mid = lo + ((hi - lo) / Decimal::TWO).floor();
        let volume = domain.volume_at(mid);
        probes += 1;

        let fits = matches!(oracle.margin_for(volume).await, Some(m) if m <= budget);
        if fits {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let volume = domain.volume_at(lo);
    debug!(%volume, %budget, probes, "Bisection finished");

    VolumeSearch {
        volume,
        kind: SearchKind::Bisected,
        probes,
    }
}
