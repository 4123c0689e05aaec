//! Paper trading host for simulation and tests.

use super::traits::TradingHost;
use super::types::*;
use crate::config::{LeverageTier, PaperConfig, PaperInstrumentConfig};
use crate::error::HostFault;
use crate::utils::decimal::round_down_to_lot;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated instrument with its quote and margin schedule.
#[derive(Debug, Clone)]
pub struct PaperInstrument {
    pub info: InstrumentInfo,
    /// `None` when the market has no quote
    pub quote: Option<(Decimal, Decimal)>,
    pub leverage_tiers: Vec<LeverageTier>,
    pub margin_floor: Decimal,
    /// Share of each open request the host commits (1 = full fill)
    pub fill_ratio: Decimal,
}

impl PaperInstrument {
    fn from_config(cfg: &PaperInstrumentConfig) -> Self {
        Self {
            info: InstrumentInfo {
                key: cfg.key.clone(),
                min_trade_volume: cfg.min_trade_volume,
                max_trade_volume: cfg.max_trade_volume,
                volume_step: cfg.volume_step,
                contract_size: cfg.contract_size,
                tradable: cfg.tradable,
            },
            quote: Some((cfg.bid, cfg.ask)),
            leverage_tiers: cfg.leverage_tiers.clone(),
            margin_floor: cfg.margin_floor,
            fill_ratio: Decimal::ONE,
        }
    }

    fn price(&self, side: OrderSide) -> Option<Decimal> {
        self.quote.map(|(bid, ask)| match side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        })
    }

    /// Tiered margin: each volume slice is charged at its tier's leverage.
    ///
    /// A zero leverage leaves the volume unpriced.
    fn margin(&self, side: OrderSide, volume: Decimal) -> Option<Decimal> {
        let price = self.price(side)?;
        if volume <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }

        let notional_per_lot = price * self.info.contract_size;
        let mut margin = Decimal::ZERO;
        let mut charged = Decimal::ZERO;

        for tier in &self.leverage_tiers {
            let bound = tier.up_to_volume.unwrap_or(volume).min(volume);
            if bound > charged {
                margin += ((bound - charged) * notional_per_lot).checked_div(tier.leverage)?;
                charged = bound;
            }
            if charged >= volume {
                break;
            }
        }

        if charged < volume {
            // Past the last bounded tier, or no tiers at all
            let leverage = self
                .leverage_tiers
                .last()
                .map(|t| t.leverage)
                .unwrap_or(Decimal::ONE);
            margin += ((volume - charged) * notional_per_lot).checked_div(leverage)?;
        }

        Some(margin.max(self.margin_floor))
    }
}

/// Simulated net position.
#[derive(Debug, Clone, Default)]
pub struct PaperPosition {
    pub net_volume: Decimal,
    pub avg_price: Decimal,
}

/// Paper trading account state.
#[derive(Debug, Default)]
pub struct PaperTradingState {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub positions: HashMap<String, PaperPosition>,
    pub orders: Vec<Order>,
    pub submitted: Vec<OrderRequest>,
    pub order_count: u64,
    /// Upcoming open requests to reject
    pub pending_open_faults: u32,
    /// Upcoming cancel requests to reject
    pub pending_cancel_faults: u32,
}

/// In-memory trading host.
pub struct PaperTradingHost {
    state: Arc<RwLock<PaperTradingState>>,
    instruments: Arc<RwLock<HashMap<String, PaperInstrument>>>,
    account_kind: AccountKind,
    order_id_counter: AtomicU64,
    margin_queries: AtomicU64,
    cancel_requests: AtomicU64,
}

impl PaperTradingHost {
    /// Create a host with a balance and no instruments.
    pub fn new(initial_balance: Decimal) -> Self {
        let state = PaperTradingState {
            initial_balance,
            balance: initial_balance,
            ..Default::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            instruments: Arc::new(RwLock::new(HashMap::new())),
            account_kind: AccountKind::Net,
            order_id_counter: AtomicU64::new(1),
            margin_queries: AtomicU64::new(0),
            cancel_requests: AtomicU64::new(0),
        }
    }

    /// Create a host from the `[paper]` configuration section.
    pub fn from_config(config: &PaperConfig) -> Self {
        let instruments: HashMap<String, PaperInstrument> = config
            .instruments
            .iter()
            .map(|cfg| (cfg.key.clone(), PaperInstrument::from_config(cfg)))
            .collect();

        let mut host = Self::new(config.initial_balance);
        host.instruments = Arc::new(RwLock::new(instruments));
        host.account_kind = config.account_kind;
        host
    }

    pub async fn add_instrument(&self, instrument: PaperInstrument) {
        self.instruments
            .write()
            .await
            .insert(instrument.info.key.clone(), instrument);
    }

    /// Replace the quote; `None` removes it.
    pub async fn set_quote(&self, key: &str, quote: Option<(Decimal, Decimal)>) {
        if let Some(instrument) = self.instruments.write().await.get_mut(key) {
            instrument.quote = quote;
        }
    }

    pub async fn set_fill_ratio(&self, key: &str, ratio: Decimal) {
        if let Some(instrument) = self.instruments.write().await.get_mut(key) {
            instrument.fill_ratio = ratio;
        }
    }

    pub async fn fail_next_opens(&self, count: u32) {
        self.state.write().await.pending_open_faults = count;
    }

    pub async fn fail_next_cancels(&self, count: u32) {
        self.state.write().await.pending_cancel_faults = count;
    }

    /// Place a resting order directly, bypassing execution.
    pub async fn add_resting_order(
        &self,
        instrument: &str,
        side: OrderSide,
        volume: Decimal,
        price: Decimal,
        tag: Option<&str>,
    ) -> String {
        let id = self.next_order_id();
        self.state.write().await.orders.push(Order {
            id: id.clone(),
            instrument: instrument.to_string(),
            side,
            remaining_volume: volume,
            price,
            tag: tag.map(str::to_string),
            expires_at: None,
        });
        id
    }

    pub async fn set_position(&self, instrument: &str, net_volume: Decimal, avg_price: Decimal) {
        self.state.write().await.positions.insert(
            instrument.to_string(),
            PaperPosition {
                net_volume,
                avg_price,
            },
        );
    }

    /// Book a realized gain or loss straight to the balance.
    pub async fn adjust_balance(&self, delta: Decimal) {
        self.state.write().await.balance += delta;
    }

    /// Every open request the host received, accepted or not.
    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.read().await.submitted.clone()
    }

    pub fn margin_queries(&self) -> u64 {
        self.margin_queries.load(Ordering::SeqCst)
    }

    pub fn cancel_requests(&self) -> u64 {
        self.cancel_requests.load(Ordering::SeqCst)
    }

    pub async fn position_volume(&self, instrument: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(instrument)
            .map(|p| p.net_volume)
            .unwrap_or(Decimal::ZERO)
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// Mark-to-market PnL of all positions.
fn unrealized_pnl(state: &PaperTradingState, instruments: &HashMap<String, PaperInstrument>) -> Decimal {
    let mut pnl = Decimal::ZERO;

    for (key, position) in &state.positions {
        let Some(instrument) = instruments.get(key) else {
            continue;
        };
        // Mark longs at bid and shorts at ask
        let mark_side = if position.net_volume > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        if let Some(mark) = instrument.price(mark_side) {
            pnl += position.net_volume * (mark - position.avg_price) * instrument.info.contract_size;
        }
    }

    pnl
}

/// Apply a fill to a net position, returning realized PnL in price units per lot.
fn apply_fill(position: &mut PaperPosition, side: OrderSide, volume: Decimal, price: Decimal) -> Decimal {
    let signed = match side {
        OrderSide::Buy => volume,
        OrderSide::Sell => -volume,
    };
    let current = position.net_volume;

    if volume == Decimal::ZERO {
        return Decimal::ZERO;
    }

    if current == Decimal::ZERO || current.is_sign_positive() == signed.is_sign_positive() {
        let total = current.abs() + volume;
        position.avg_price = (position.avg_price * current.abs() + price * volume) / total;
        position.net_volume = current + signed;
        return Decimal::ZERO;
    }

    let closed = current.abs().min(volume);
    let direction = if current > Decimal::ZERO {
        Decimal::ONE
    } else {
        Decimal::NEGATIVE_ONE
    };
    let realized = closed * (price - position.avg_price) * direction;

    position.net_volume = current + signed;
    if position.net_volume == Decimal::ZERO {
        position.avg_price = Decimal::ZERO;
    } else if position.net_volume.is_sign_positive() != current.is_sign_positive() {
        // Flipped through zero, the remainder opens at the fill price
        position.avg_price = price;
    }

    realized
}

#[async_trait]
impl TradingHost for PaperTradingHost {
    async fn instrument(&self, key: &str) -> Option<InstrumentInfo> {
        self.instruments
            .read()
            .await
            .get(key)
            .map(|i| i.info.clone())
    }

    async fn best_price(&self, instrument: &str, side: OrderSide) -> Option<Decimal> {
        self.instruments
            .read()
            .await
            .get(instrument)
            .and_then(|i| i.price(side))
    }

    async fn margin_required(
        &self,
        instrument: &str,
        side: OrderSide,
        volume: Decimal,
    ) -> Option<Decimal> {
        self.margin_queries.fetch_add(1, Ordering::SeqCst);
        self.instruments
            .read()
            .await
            .get(instrument)
            .and_then(|i| i.margin(side, volume))
    }

    async fn open_order(&self, request: &OrderRequest) -> Result<OpenOrderOutcome, HostFault> {
        let instruments = self.instruments.read().await;
        let mut state = self.state.write().await;
        state.submitted.push(request.clone());

        if state.pending_open_faults > 0 {
            state.pending_open_faults -= 1;
            return Err(HostFault::Rejected("simulated reject".to_string()));
        }

        let instrument = instruments
            .get(&request.instrument)
            .ok_or_else(|| HostFault::Rejected(format!("unknown instrument {}", request.instrument)))?;

        if !instrument.info.tradable || instrument.quote.is_none() {
            return Err(HostFault::Rejected("market closed".to_string()));
        }
        if request.volume < instrument.info.min_trade_volume
            || request.volume > instrument.info.max_trade_volume
        {
            return Err(HostFault::Rejected(format!(
                "volume {} outside [{}, {}]",
                request.volume, instrument.info.min_trade_volume, instrument.info.max_trade_volume
            )));
        }

        let filled = round_down_to_lot(
            request.volume * instrument.fill_ratio,
            instrument.info.volume_step,
        )
        .min(request.volume);
        let remaining = request.volume - filled;
        let contract_size = instrument.info.contract_size;

        let position = state
            .positions
            .entry(request.instrument.clone())
            .or_default();
        let realized = apply_fill(position, request.side, filled, request.price) * contract_size;

        state.balance += realized;
        state.order_count += 1;
        let order_id = self.next_order_id();

        info!(
            %order_id,
            instrument = %request.instrument,
            side = %request.side,
            requested = %request.volume,
            %filled,
            price = %request.price,
            "Paper order executed"
        );

        Ok(OpenOrderOutcome {
            order_id,
            filled_volume: filled,
            remaining_volume: remaining,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), HostFault> {
        self.cancel_requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        if state.pending_cancel_faults > 0 {
            state.pending_cancel_faults -= 1;
            return Err(HostFault::Unavailable);
        }

        let before = state.orders.len();
        state.orders.retain(|o| o.id != order_id);
        if state.orders.len() == before {
            return Err(HostFault::OrderNotFound(order_id.to_string()));
        }

        debug!(%order_id, "Paper order cancelled");
        Ok(())
    }

    async fn list_open_orders(&self, instrument: &str) -> Vec<Order> {
        self.state
            .read()
            .await
            .orders
            .iter()
            .filter(|o| o.instrument == instrument)
            .cloned()
            .collect()
    }

    async fn current_position(&self, instrument: &str) -> Position {
        self.state
            .read()
            .await
            .positions
            .get(instrument)
            .map(|p| Position {
                instrument: instrument.to_string(),
                net_volume: p.net_volume,
            })
            .unwrap_or_else(|| Position::flat(instrument))
    }

    async fn account_capital(&self, basis: CapitalBasis) -> Decimal {
        let instruments = self.instruments.read().await;
        let state = self.state.read().await;
        match basis {
            CapitalBasis::Balance => state.balance,
            CapitalBasis::Equity => state.balance + unrealized_pnl(&state, &instruments),
        }
    }

    async fn account_kind(&self) -> AccountKind {
        self.account_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Helper functions
    // =========================================================================

    fn fx_instrument(key: &str, bid: Decimal, ask: Decimal) -> PaperInstrument {
        PaperInstrument {
            info: InstrumentInfo {
                key: key.to_string(),
                min_trade_volume: dec!(0.01),
                max_trade_volume: dec!(10),
                volume_step: dec!(0.01),
                contract_size: dec!(100000),
                tradable: true,
            },
            quote: Some((bid, ask)),
            leverage_tiers: vec![
                LeverageTier {
                    up_to_volume: Some(dec!(1)),
                    leverage: dec!(100),
                },
                LeverageTier {
                    up_to_volume: None,
                    leverage: dec!(50),
                },
            ],
            margin_floor: Decimal::ZERO,
            fill_ratio: Decimal::ONE,
        }
    }

    async fn create_test_host() -> PaperTradingHost {
        let host = PaperTradingHost::new(dec!(10000));
        host.add_instrument(fx_instrument("EURUSD", dec!(1.0850), dec!(1.0852)))
            .await;
        host
    }

    fn request(side: OrderSide, volume: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: "EURUSD".to_string(),
            side,
            volume,
            price,
            tag: "test".to_string(),
            expires_at: None,
        }
    }

    // =========================================================================
    // Margin Oracle Tests
    // =========================================================================

    #[tokio::test]
    async fn test_tiered_margin_is_non_linear() {
        let host = create_test_host().await;

        // 1 lot at 100x on the ask
        let one = host
            .margin_required("EURUSD", OrderSide::Buy, dec!(1))
            .await
            .unwrap();
        assert_eq!(one, dec!(1085.2));

        // Second lot is charged at 50x
        let two = host
            .margin_required("EURUSD", OrderSide::Buy, dec!(2))
            .await
            .unwrap();
        assert_eq!(two, dec!(1085.2) + dec!(2170.4));
        assert!(two > one * dec!(2));
    }

    #[tokio::test]
    async fn test_margin_is_none_without_quote() {
        let host = create_test_host().await;
        host.set_quote("EURUSD", None).await;

        assert!(host
            .margin_required("EURUSD", OrderSide::Sell, dec!(1))
            .await
            .is_none());
        assert!(host.best_price("EURUSD", OrderSide::Sell).await.is_none());
        assert_eq!(host.margin_queries(), 1);
    }

    #[tokio::test]
    async fn test_zero_leverage_is_unpriced() {
        let host = PaperTradingHost::new(dec!(10000));
        let mut instrument = fx_instrument("EURUSD", dec!(1.0850), dec!(1.0852));
        instrument.leverage_tiers = vec![LeverageTier {
            up_to_volume: None,
            leverage: Decimal::ZERO,
        }];
        host.add_instrument(instrument).await;

        assert!(host
            .margin_required("EURUSD", OrderSide::Buy, dec!(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_margin_floor_applies_to_small_volume() {
        let host = PaperTradingHost::new(dec!(10000));
        let mut instrument = fx_instrument("XAUUSD", dec!(2350), dec!(2350.5));
        instrument.info.contract_size = dec!(100);
        instrument.margin_floor = dec!(50);
        host.add_instrument(instrument).await;

        let small = host
            .margin_required("XAUUSD", OrderSide::Buy, dec!(0.01))
            .await
            .unwrap();
        assert_eq!(small, dec!(50));
        assert_eq!(
            host.margin_required("XAUUSD", OrderSide::Buy, Decimal::ZERO)
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    // =========================================================================
    // Order Execution Tests
    // =========================================================================

    #[tokio::test]
    async fn test_open_order_updates_position() {
        let host = create_test_host().await;

        let outcome = host
            .open_order(&request(OrderSide::Sell, dec!(0.5), dec!(1.0850)))
            .await
            .unwrap();

        assert_eq!(outcome.filled_volume, dec!(0.5));
        assert_eq!(outcome.remaining_volume, Decimal::ZERO);
        assert_eq!(host.position_volume("EURUSD").await, dec!(-0.5));

        let position = host.current_position("EURUSD").await;
        assert_eq!(position.volume_on(OrderSide::Sell), dec!(0.5));
    }

    #[tokio::test]
    async fn test_partial_fill_reports_remaining() {
        let host = create_test_host().await;
        host.set_fill_ratio("EURUSD", dec!(0.6)).await;

        let outcome = host
            .open_order(&request(OrderSide::Buy, dec!(1), dec!(1.0852)))
            .await
            .unwrap();

        assert_eq!(outcome.filled_volume, dec!(0.6));
        assert_eq!(outcome.remaining_volume, dec!(0.4));
    }

    #[tokio::test]
    async fn test_injected_open_faults_are_consumed() {
        let host = create_test_host().await;
        host.fail_next_opens(2).await;

        let req = request(OrderSide::Buy, dec!(0.1), dec!(1.0852));
        assert!(host.open_order(&req).await.is_err());
        assert!(host.open_order(&req).await.is_err());
        assert!(host.open_order(&req).await.is_ok());
        assert_eq!(host.submitted_orders().await.len(), 3);
    }

    #[tokio::test]
    async fn test_rejects_volume_above_single_order_max() {
        let host = create_test_host().await;
        let result = host
            .open_order(&request(OrderSide::Buy, dec!(11), dec!(1.0852)))
            .await;
        assert!(matches!(result, Err(HostFault::Rejected(_))));
    }

    // =========================================================================
    // Cancel Tests
    // =========================================================================

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let host = create_test_host().await;
        let id = host
            .add_resting_order("EURUSD", OrderSide::Buy, dec!(0.3), dec!(1.08), Some("test"))
            .await;

        assert_eq!(host.list_open_orders("EURUSD").await.len(), 1);
        host.cancel_order(&id).await.unwrap();
        assert!(host.list_open_orders("EURUSD").await.is_empty());
        assert_eq!(
            host.cancel_order(&id).await,
            Err(HostFault::OrderNotFound(id.clone()))
        );
    }

    #[tokio::test]
    async fn test_injected_cancel_fault() {
        let host = create_test_host().await;
        let id = host
            .add_resting_order("EURUSD", OrderSide::Sell, dec!(0.3), dec!(1.09), None)
            .await;
        host.fail_next_cancels(1).await;

        assert_eq!(host.cancel_order(&id).await, Err(HostFault::Unavailable));
        assert!(host.cancel_order(&id).await.is_ok());
        assert_eq!(host.cancel_requests(), 2);
    }

    // =========================================================================
    // Account Capital Tests
    // =========================================================================

    #[tokio::test]
    async fn test_equity_includes_unrealized_pnl() {
        let host = create_test_host().await;
        host.set_position("EURUSD", dec!(1), dec!(1.0800)).await;

        // Marked at bid 1.0850: 1 lot * 0.0050 * 100000 = 500
        assert_eq!(host.account_capital(CapitalBasis::Balance).await, dec!(10000));
        assert_eq!(host.account_capital(CapitalBasis::Equity).await, dec!(10500));
    }

    #[tokio::test]
    async fn test_closing_trade_realizes_pnl() {
        let host = create_test_host().await;
        host.set_position("EURUSD", dec!(1), dec!(1.0800)).await;

        host.open_order(&request(OrderSide::Sell, dec!(1), dec!(1.0850)))
            .await
            .unwrap();

        assert_eq!(host.position_volume("EURUSD").await, Decimal::ZERO);
        assert_eq!(host.account_capital(CapitalBasis::Balance).await, dec!(10500));
    }

    #[tokio::test]
    async fn test_from_config_uses_paper_defaults() {
        let host = PaperTradingHost::from_config(&PaperConfig::default());

        assert!(host.instrument("EURUSD").await.is_some());
        assert!(host.instrument("USDJPY").await.is_none());
        assert_eq!(host.account_kind().await, AccountKind::Net);
        assert_eq!(host.account_capital(CapitalBasis::Equity).await, dec!(10000));
    }
}
