//! Per-instrument margin delta and order sizing.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::allocation::AllocationEntry;
use crate::exchange::{InstrumentInfo, OrderSide, TradingHost};
use crate::strategy::search::{search_volume, HostMarginOracle, SearchKind, VolumeDomain};

/// Signed margin already committed to an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommittedMargin {
    /// Buy-side margin minus sell-side margin
    pub signed: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    /// A side with exposure could not be priced and was counted as zero
    pub degraded: bool,
}

impl CommittedMargin {
    pub fn has_exposure(&self) -> bool {
        self.buy_volume > Decimal::ZERO || self.sell_volume > Decimal::ZERO
    }
}

/// Read position and tagged orders and price both sides.
pub async fn committed_margin<H: TradingHost + ?Sized>(
    host: &H,
    instrument: &str,
    tag: &str,
) -> CommittedMargin {
    let position = host.current_position(instrument).await;
    let orders = host.list_open_orders(instrument).await;

    let resting = |side: OrderSide| -> Decimal {
        orders
            .iter()
            .filter(|o| o.side == side && o.is_tagged(tag))
            .map(|o| o.remaining_volume)
            .sum()
    };

    let buy_volume = position.volume_on(OrderSide::Buy) + resting(OrderSide::Buy);
    let sell_volume = position.volume_on(OrderSide::Sell) + resting(OrderSide::Sell);

    let mut degraded = false;
    let mut side_margin = |margin: Option<Decimal>, side: OrderSide| match margin {
        Some(m) => m,
        None => {
            warn!(%instrument, %side, "Margin unavailable, counting side as zero");
            degraded = true;
            Decimal::ZERO
        }
    };

    let buy = if buy_volume > Decimal::ZERO {
        let margin = host.margin_required(instrument, OrderSide::Buy, buy_volume).await;
        side_margin(margin, OrderSide::Buy)
    } else {
        Decimal::ZERO
    };
    let sell = if sell_volume > Decimal::ZERO {
        let margin = host.margin_required(instrument, OrderSide::Sell, sell_volume).await;
        side_margin(margin, OrderSide::Sell)
    } else {
        Decimal::ZERO
    };

    CommittedMargin {
        signed: buy - sell,
        buy_volume,
        sell_volume,
        degraded,
    }
}

/// Sizing decision for one instrument in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentPlan {
    pub target_percent: Decimal,
    pub capital: Decimal,
    pub expected_margin: Decimal,
    pub current_margin: Decimal,
    pub required_delta: Decimal,
    pub side: OrderSide,
    /// Zero when no order should be placed
    pub volume: Decimal,
    pub search: Option<SearchKind>,
    pub probes: u32,
    pub has_exposure: bool,
    pub degraded: bool,
}

impl InstrumentPlan {
    /// Nothing to hold and nothing held.
    pub fn is_idle(&self) -> bool {
        self.target_percent.is_zero() && !self.has_exposure
    }
}

/// Decide side and volume for `entry` from the host's current state.
///
/// Reads the position and open orders fresh; calling it twice with no host
/// change in between gives the same plan.
pub async fn plan_instrument<H: TradingHost + ?Sized>(
    host: &H,
    entry: &AllocationEntry,
    info: &InstrumentInfo,
    cap: Decimal,
    capital: Decimal,
    tag: &str,
) -> InstrumentPlan {
    let expected_margin = entry.expected_margin(capital);
    let committed = committed_margin(host, &info.key, tag).await;
    let required_delta = expected_margin - committed.signed;
    let side = OrderSide::from_sign(required_delta);

    let mut plan = InstrumentPlan {
        target_percent: entry.target_percent,
        capital,
        expected_margin,
        current_margin: committed.signed,
        required_delta,
        side,
        volume: Decimal::ZERO,
        search: None,
        probes: 0,
        has_exposure: committed.has_exposure(),
        degraded: committed.degraded,
    };

    if required_delta.is_zero() {
        return plan;
    }

    // Volumes above the per-order maximum are split by the open phase
    let domain = VolumeDomain::new(info.min_trade_volume, cap, info.volume_step);
    let oracle = HostMarginOracle::new(host, &info.key, side);
    let result = search_volume(&oracle, domain, required_delta.abs()).await;

    plan.volume = result.volume;
    plan.search = Some(result.kind);
    plan.probes = result.probes;
    if result.kind == SearchKind::Unpriced {
        plan.degraded = true;
    }

    debug!(
        instrument = %entry.display_name(),
        %expected_margin,
        current_margin = %committed.signed,
        %required_delta,
        %side,
        volume = %plan.volume,
        probes = result.probes,
        "Instrument planned"
    );

    plan
}
