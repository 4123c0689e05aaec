//! Venue-agnostic trading host interface.
//!
//! The engine never talks to a venue directly. Everything it knows about
//! quotes, margin, orders and account capital comes through [`TradingHost`]:
//! - Market data (best price per side)
//! - The margin oracle (required margin for a candidate volume)
//! - Order execution (open, cancel, enumerate)
//! - Account state (positions, balance/equity, account kind)

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{
    AccountKind, CapitalBasis, InstrumentInfo, OpenOrderOutcome, Order, OrderRequest, OrderSide,
    Position,
};
use crate::error::HostFault;

/// Execution and market data provider.
///
/// Implementations are expected to be eventually consistent rather than
/// instantaneous truth; every call is a potential suspension point.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradingHost: Send + Sync {
    /// Instrument limits, or `None` if the host does not know the key.
    async fn instrument(&self, key: &str) -> Option<InstrumentInfo>;

    /// Best price for placing an order on `side`, `None` without a quote.
    async fn best_price(&self, instrument: &str, side: OrderSide) -> Option<Decimal>;

    /// Margin the host would reserve for `volume` on `side`.
    ///
    /// Monotonically non-decreasing in `volume`, generally non-linear.
    /// `None` when the instrument cannot be priced right now.
    async fn margin_required(
        &self,
        instrument: &str,
        side: OrderSide,
        volume: Decimal,
    ) -> Option<Decimal>;

    /// Submit a limit order. May partially fill.
    async fn open_order(&self, request: &OrderRequest) -> Result<OpenOrderOutcome, HostFault>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), HostFault>;

    async fn list_open_orders(&self, instrument: &str) -> Vec<Order>;

    async fn current_position(&self, instrument: &str) -> Position;

    async fn account_capital(&self, basis: CapitalBasis) -> Decimal;

    async fn account_kind(&self) -> AccountKind;
}
