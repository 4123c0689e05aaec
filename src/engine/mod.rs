//! Rebalance engine control loop.
//!
//! A single loop drives cycles sequentially. Within a cycle every
//! allocation entry runs its own reconciliation chain concurrently, and the
//! capital snapshot keeps its own cadence even while a cycle is in flight.

mod cycle;
mod status;
mod trigger;

pub use cycle::{
    rebalance_instrument, run_cycle, CycleContext, CycleReport, InstrumentReport,
    InstrumentStatus,
};
pub use status::{
    instrument_line, render_halt, render_status, MemoryStatusSink, StatusSink, StatusView,
    TracingStatusSink,
};
pub use trigger::PeriodicTrigger;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::allocation::AllocationTable;
use crate::config::{EngineConfig, ExecutionConfig};
use crate::error::StartupError;
use crate::exchange::{AccountKind, CapitalBasis, TradingHost};
use crate::risk::{EquityCircuitBreaker, HaltRecord};
use crate::strategy::RetryPolicy;

/// How often the snapshot trigger is checked while a cycle runs.
const SNAPSHOT_POLL: Duration = Duration::from_millis(250);

/// Lifecycle of the engine. `Halted` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Running,
    Halted(HaltRecord),
}

/// Result of one control-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Halted,
}

/// Steers a host account toward the allocation table.
pub struct RebalanceEngine<H: TradingHost> {
    host: Arc<H>,
    table: AllocationTable,
    settings: EngineConfig,
    execution: ExecutionConfig,
    policy: RetryPolicy,
    rebalance_trigger: PeriodicTrigger,
    snapshot_trigger: PeriodicTrigger,
    breaker: EquityCircuitBreaker,
    state: EngineState,
    last_cycle: Option<CycleReport>,
    cycles_run: u64,
    sink: Box<dyn StatusSink>,
}

impl<H: TradingHost> RebalanceEngine<H> {
    /// Check the host account and capture the starting equity baseline.
    pub async fn new(
        host: Arc<H>,
        table: AllocationTable,
        settings: EngineConfig,
        execution: ExecutionConfig,
        sink: Box<dyn StatusSink>,
    ) -> Result<Self, StartupError> {
        let kind = host.account_kind().await;
        if kind != AccountKind::Net {
            return Err(StartupError::UnsupportedAccount(kind.to_string()));
        }

        let equity = host.account_capital(CapitalBasis::Equity).await;
        let breaker =
            EquityCircuitBreaker::new(settings.equity_drawdown_stop_percent, equity, Utc::now());

        info!(
            instruments = table.len(),
            total_percent = %table.total_percent().normalize(),
            %equity,
            "Rebalance engine ready"
        );

        Ok(Self {
            policy: RetryPolicy::from(&execution),
            rebalance_trigger: PeriodicTrigger::every_minutes(settings.rebalance_interval_minutes),
            snapshot_trigger: PeriodicTrigger::every_seconds(settings.equity_snapshot_interval_secs),
            host,
            table,
            settings,
            execution,
            breaker,
            state: EngineState::Running,
            last_cycle: None,
            cycles_run: 0,
            sink,
        })
    }

    /// One control-loop iteration at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if let EngineState::Halted(halt) = &self.state {
            self.sink.write_status(&render_halt(halt));
            self.sink.flush();
            return TickOutcome::Halted;
        }

        if self.rebalance_trigger.poll(now) {
            self.cycles_run += 1;
            let started = Instant::now();
            let ctx = CycleContext {
                engine: &self.settings,
                execution: &self.execution,
                policy: self.policy,
                started_at: now,
            };

            let cycle = run_cycle(self.host.as_ref(), &self.table, &ctx, self.cycles_run);
            tokio::pin!(cycle);
            let mut snapshot_poll = tokio::time::interval(SNAPSHOT_POLL);

            // The snapshot cadence does not wait for the cycle
            let report = loop {
                tokio::select! {
                    report = &mut cycle => break report,
                    _ = snapshot_poll.tick() => {
                        let at = now + chrono::Duration::from_std(started.elapsed())
                            .unwrap_or_else(|_| chrono::Duration::zero());
                        if self.snapshot_trigger.poll(at) {
                            let equity = self.host.account_capital(CapitalBasis::Equity).await;
                            self.breaker.remember(equity, at);
                        }
                    }
                }
            };

            debug!(
                cycle = report.number,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Cycle joined"
            );
            self.last_cycle = Some(report);
        }

        if self.snapshot_trigger.poll(now) {
            let equity = self.host.account_capital(CapitalBasis::Equity).await;
            self.breaker.remember(equity, now);
        }

        let balance = self.host.account_capital(CapitalBasis::Balance).await;
        let equity = self.host.account_capital(CapitalBasis::Equity).await;

        if self.breaker.check(equity, now) {
            if let Some(halt) = self.breaker.halt().copied() {
                error!(
                    drawdown = %halt.drawdown_percent.round_dp(2),
                    threshold = %halt.threshold_percent,
                    "Engine halted, no further cycles will run"
                );
                self.sink.write_status(&render_halt(&halt));
                self.sink.flush();
                self.state = EngineState::Halted(halt);
                return TickOutcome::Halted;
            }
        }

        let text = render_status(&StatusView {
            now,
            settings: &self.settings,
            balance,
            equity,
            cycle: self.last_cycle.as_ref(),
            baseline: self.breaker.baseline(),
            snapshot_in_secs: self.snapshot_trigger.seconds_until_due(now),
            rebalance_in_secs: self.rebalance_trigger.seconds_until_due(now),
        });
        self.sink.write_status(&text);
        self.sink.flush();

        TickOutcome::Continue
    }

    /// Tick every `status_update_secs` until halted or `shutdown` is raised.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> &EngineState {
        let period = Duration::from_secs(self.settings.status_update_secs.max(1));
        info!(period_secs = period.as_secs(), "Control loop started");

        while !shutdown.load(Ordering::SeqCst) {
            if self.tick(Utc::now()).await == TickOutcome::Halted {
                break;
            }

            // Sleep in short steps so a shutdown request is noticed promptly
            let wake = Instant::now() + period;
            while Instant::now() < wake && !shutdown.load(Ordering::SeqCst) {
                let left = wake.saturating_duration_since(Instant::now());
                tokio::time::sleep(SNAPSHOT_POLL.min(left)).await;
            }
        }

        info!(cycles = self.cycles_run, "Control loop stopped");
        &self.state
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, EngineState::Halted(_))
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run
    }

    pub fn last_cycle(&self) -> Option<&CycleReport> {
        self.last_cycle.as_ref()
    }

    pub fn breaker(&self) -> &EquityCircuitBreaker {
        &self.breaker
    }

    pub fn table(&self) -> &AllocationTable {
        &self.table
    }
}
