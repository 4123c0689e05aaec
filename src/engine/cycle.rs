//! One rebalance cycle: a reconciliation chain per allocation entry.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::allocation::{AllocationEntry, AllocationTable};
use crate::config::{EngineConfig, ExecutionConfig};
use crate::error::AllocationError;
use crate::exchange::TradingHost;
use crate::strategy::{
    cancel_phase, open_phase, plan_instrument, CancelSummary, InstrumentPlan, OpenRequest,
    OpenSummary, RetryPolicy,
};

/// Settings shared by every chain of one cycle.
#[derive(Debug, Clone)]
pub struct CycleContext<'a> {
    pub engine: &'a EngineConfig,
    pub execution: &'a ExecutionConfig,
    pub policy: RetryPolicy,
    pub started_at: DateTime<Utc>,
}

impl CycleContext<'_> {
    /// Orders outlive the cycle that placed them by one interval plus grace.
    fn order_expiry(&self) -> DateTime<Utc> {
        let minutes = i64::from(self.engine.rebalance_interval_minutes)
            + i64::from(self.execution.order_expiry_grace_minutes);
        self.started_at + Duration::minutes(minutes)
    }
}

/// Outcome of one instrument's chain.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentStatus {
    NotFound,
    NotTradable,
    CapBelowMinimum { cap: Decimal, min: Decimal },
    /// Zero target and nothing held; not reported
    Idle,
    Rebalanced {
        cap: Decimal,
        plan: InstrumentPlan,
        cancel: CancelSummary,
        open: OpenSummary,
        degraded: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReport {
    pub entry: AllocationEntry,
    pub status: InstrumentStatus,
}

impl InstrumentReport {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, InstrumentStatus::Rebalanced { degraded: true, .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self.status,
            InstrumentStatus::NotFound
                | InstrumentStatus::NotTradable
                | InstrumentStatus::CapBelowMinimum { .. }
        )
    }
}

/// Joined outcome of every chain in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub number: u64,
    pub started_at: DateTime<Utc>,
    pub instruments: Vec<InstrumentReport>,
}

impl CycleReport {
    pub fn placed_orders(&self) -> usize {
        self.instruments
            .iter()
            .map(|report| match &report.status {
                InstrumentStatus::Rebalanced { open, .. } => open.order_ids.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Resolve, cancel, plan and open for one entry.
///
/// Nothing here fails the cycle; every problem ends up in the report.
pub async fn rebalance_instrument<H: TradingHost + ?Sized>(
    host: &H,
    entry: &AllocationEntry,
    ctx: &CycleContext<'_>,
) -> InstrumentReport {
    let report = |status| InstrumentReport {
        entry: entry.clone(),
        status,
    };
    let name = entry.display_name();

    let Some(info) = host.instrument(&entry.instrument_key).await else {
        warn!(instrument = %name, "Instrument not found on host, skipping");
        return report(InstrumentStatus::NotFound);
    };
    if !info.tradable {
        warn!(instrument = %name, "Instrument not tradable, skipping");
        return report(InstrumentStatus::NotTradable);
    }
    let cap = match entry.check_instrument(ctx.engine.default_max_exposure, &info) {
        Ok(cap) => cap,
        Err(AllocationError::CapBelowMinimum { cap, min, .. }) => {
            warn!(instrument = %name, %cap, %min, "Max exposure below min trade volume, skipping");
            return report(InstrumentStatus::CapBelowMinimum { cap, min });
        }
        Err(e) => {
            warn!(instrument = %name, error = %e, "Instrument rejected, skipping");
            return report(InstrumentStatus::NotTradable);
        }
    };

    let tag = ctx.execution.order_tag.as_str();
    let cancel = cancel_phase(host, &info.key, tag, &ctx.policy).await;

    // Plan from post-cancel state
    let capital = host.account_capital(ctx.engine.capital_basis).await;
    let plan = plan_instrument(host, entry, &info, cap, capital, tag).await;
    if plan.is_idle() && cancel.requested == 0 {
        return report(InstrumentStatus::Idle);
    }

    let mut degraded = plan.degraded;
    let mut open = OpenSummary::default();

    if plan.volume > Decimal::ZERO {
        match host.best_price(&info.key, plan.side).await {
            Some(price) => {
                let request = OpenRequest {
                    info: &info,
                    side: plan.side,
                    volume: plan.volume,
                    price,
                    tag,
                    expires_at: Some(ctx.order_expiry()),
                };
                open = open_phase(host, request, &ctx.policy).await;
            }
            None => {
                warn!(instrument = %name, side = %plan.side, "No quote, order skipped");
                degraded = true;
            }
        }
    }

    info!(
        instrument = %name,
        expected = %plan.expected_margin.round_dp(2),
        current = %plan.current_margin.round_dp(2),
        side = %plan.side,
        planned = %plan.volume,
        placed = %open.placed,
        cancelled = cancel.cancelled(),
        degraded,
        "Instrument rebalanced"
    );

    report(InstrumentStatus::Rebalanced {
        cap,
        plan,
        cancel,
        open,
        degraded,
    })
}

/// Run every entry's chain concurrently and join the outcomes.
pub async fn run_cycle<H: TradingHost + ?Sized>(
    host: &H,
    table: &AllocationTable,
    ctx: &CycleContext<'_>,
    number: u64,
) -> CycleReport {
    info!(cycle = number, instruments = table.len(), "Rebalance cycle started");

    let chains = table
        .entries()
        .iter()
        .map(|entry| rebalance_instrument(host, entry, ctx));
    let instruments = join_all(chains).await;

    let report = CycleReport {
        number,
        started_at: ctx.started_at,
        instruments,
    };

    info!(
        cycle = number,
        orders = report.placed_orders(),
        degraded = report.instruments.iter().filter(|r| r.is_degraded()).count(),
        skipped = report.instruments.iter().filter(|r| r.is_skipped()).count(),
        "Rebalance cycle finished"
    );

    report
}
