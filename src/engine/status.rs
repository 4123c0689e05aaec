//! Human-readable status reports.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::cycle::{CycleReport, InstrumentReport, InstrumentStatus};
use crate::risk::{CapitalBaseline, HaltRecord};
use crate::utils::decimal::percent_of;

/// Presentation boundary for status text.
pub trait StatusSink: Send {
    fn write_status(&mut self, text: &str);

    /// Emit everything written since the last flush as one report.
    fn flush(&mut self);
}

/// Logs each flushed report line by line.
#[derive(Debug, Default)]
pub struct TracingStatusSink {
    buffer: String,
}

impl StatusSink for TracingStatusSink {
    fn write_status(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn flush(&mut self) {
        for line in self.buffer.lines() {
            info!(target: "status", "{}", line);
        }
        self.buffer.clear();
    }
}

/// Keeps flushed reports in memory. Clones share the same reports.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusSink {
    pending: String,
    reports: Arc<Mutex<Vec<String>>>,
}

impl MemoryStatusSink {
    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    pub fn last_report(&self) -> Option<String> {
        self.reports().pop()
    }
}

impl StatusSink for MemoryStatusSink {
    fn write_status(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    fn flush(&mut self) {
        let report = std::mem::take(&mut self.pending);
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

/// Everything one status report shows.
#[derive(Debug, Clone)]
pub struct StatusView<'a> {
    pub now: DateTime<Utc>,
    pub settings: &'a EngineConfig,
    pub balance: Decimal,
    pub equity: Decimal,
    pub cycle: Option<&'a CycleReport>,
    pub baseline: &'a CapitalBaseline,
    pub snapshot_in_secs: i64,
    pub rebalance_in_secs: i64,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// One line for a non-idle instrument, `None` for idle ones.
pub fn instrument_line(report: &InstrumentReport) -> Option<String> {
    let name = report.entry.display_name();

    let line = match &report.status {
        InstrumentStatus::Idle => return None,
        InstrumentStatus::NotFound => format!("{name} - skipped: not found on host"),
        InstrumentStatus::NotTradable => format!("{name} - skipped: not tradable"),
        InstrumentStatus::CapBelowMinimum { cap, min } => {
            format!("{name} - skipped: max exposure {cap} is less than min trade volume {min}")
        }
        InstrumentStatus::Rebalanced {
            cap,
            plan,
            cancel,
            open,
            degraded,
        } => {
            let mut line = format!(
                "{name} - expected = {}%, actual = {}%, delta = {}% ({} lots {}), cap = {}",
                report.entry.target_percent.normalize(),
                percent_of(plan.current_margin, plan.capital).round_dp(2).normalize(),
                percent_of(plan.required_delta, plan.capital).round_dp(2).normalize(),
                plan.volume.normalize(),
                plan.side,
                cap.normalize(),
            );
            if !cancel.failed.is_empty() {
                let _ = write!(line, " [cancel failed for {} order(s)]", cancel.failed.len());
            }
            if let Some(fault) = &open.exhausted {
                let _ = write!(
                    line,
                    " [shortfall {} lots: {}]",
                    open.shortfall().normalize(),
                    fault
                );
            }
            if *degraded {
                line.push_str(" [degraded]");
            }
            line
        }
    };

    Some(line)
}

/// Periodic status report.
pub fn render_status(view: &StatusView<'_>) -> String {
    let settings = view.settings;
    let mut out = String::new();

    let _ = writeln!(out, "{}", timestamp(view.now));
    let _ = writeln!(
        out,
        "Rebalance interval = {} min, capital basis = {}, equity drawdown stop = {}%, \
         equity snapshot interval = {} s, status interval = {} s",
        settings.rebalance_interval_minutes,
        settings.capital_basis,
        settings.equity_drawdown_stop_percent.normalize(),
        settings.equity_snapshot_interval_secs,
        settings.status_update_secs,
    );
    let _ = writeln!(
        out,
        "Balance = {}, equity = {}",
        view.balance.round_dp(2),
        view.equity.round_dp(2)
    );

    match view.cycle {
        Some(cycle) => {
            let _ = writeln!(
                out,
                "Cycle #{} at {}",
                cycle.number,
                timestamp(cycle.started_at)
            );
            for line in cycle.instruments.iter().filter_map(instrument_line) {
                let _ = writeln!(out, "{line}");
            }
        }
        None => {
            let _ = writeln!(out, "No rebalance cycle yet");
        }
    }

    let change = percent_of(view.equity - view.baseline.equity, view.baseline.equity);
    let _ = writeln!(
        out,
        "Saved equity = {} at {}, change = {}%",
        view.baseline.equity.round_dp(2),
        timestamp(view.baseline.captured_at),
        change.round_dp(2).normalize()
    );
    let _ = writeln!(out, "Next equity snapshot in {} s", view.snapshot_in_secs);
    let _ = writeln!(out, "Next rebalance in {} s", view.rebalance_in_secs);

    out
}

/// Final report once the circuit breaker has tripped.
pub fn render_halt(halt: &HaltRecord) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", timestamp(halt.halted_at));
    let _ = writeln!(
        out,
        "Equity drawdown = {}% reached the stop of {}%",
        halt.drawdown_percent.round_dp(2).normalize(),
        halt.threshold_percent.normalize()
    );
    let _ = writeln!(
        out,
        "Saved equity = {} at {}, current equity = {}",
        halt.baseline.equity.round_dp(2),
        timestamp(halt.baseline.captured_at),
        halt.equity.round_dp(2)
    );
    let _ = writeln!(out, "Engine has been halted!");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationEntry;
    use crate::error::HostFault;
    use crate::exchange::OrderSide;
    use crate::strategy::{CancelSummary, InstrumentPlan, OpenSummary};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn entry(alias: &str, key: &str, percent: Decimal) -> AllocationEntry {
        AllocationEntry {
            alias: alias.to_string(),
            instrument_key: key.to_string(),
            target_percent: percent,
            max_exposure_cap: None,
        }
    }

    fn rebalanced(degraded: bool, exhausted: Option<HostFault>) -> InstrumentStatus {
        InstrumentStatus::Rebalanced {
            cap: dec!(50),
            plan: InstrumentPlan {
                target_percent: dec!(40),
                capital: dec!(10000),
                expected_margin: dec!(4000),
                current_margin: dec!(1000),
                required_delta: dec!(3000),
                side: OrderSide::Buy,
                volume: dec!(1.5),
                search: None,
                probes: 0,
                has_exposure: true,
                degraded,
            },
            cancel: CancelSummary::default(),
            open: OpenSummary {
                requested: dec!(1.5),
                placed: dec!(0.5),
                order_ids: vec!["o1".to_string()],
                exhausted,
            },
            degraded,
        }
    }

    #[test]
    fn test_instrument_line_format() {
        let report = InstrumentReport {
            entry: entry("EURUSD", "EURUSD", dec!(40)),
            status: rebalanced(false, None),
        };
        assert_eq!(
            instrument_line(&report).unwrap(),
            "EURUSD - expected = 40%, actual = 10%, delta = 30% (1.5 lots Buy), cap = 50"
        );
    }

    #[test]
    fn test_instrument_line_notes() {
        let report = InstrumentReport {
            entry: entry("Gold", "XAUUSD", dec!(40)),
            status: rebalanced(true, Some(HostFault::Unavailable)),
        };
        let line = instrument_line(&report).unwrap();
        assert!(line.starts_with("Gold(XAUUSD) - expected"));
        assert!(line.ends_with("[shortfall 1 lots: host unavailable] [degraded]"));
    }

    #[test]
    fn test_idle_has_no_line() {
        let report = InstrumentReport {
            entry: entry("EURUSD", "EURUSD", Decimal::ZERO),
            status: InstrumentStatus::Idle,
        };
        assert_eq!(instrument_line(&report), None);
    }

    #[test]
    fn test_status_report_sections() {
        let settings = EngineConfig::default();
        let baseline = CapitalBaseline {
            equity: dec!(10000),
            captured_at: t0(),
        };
        let text = render_status(&StatusView {
            now: t0(),
            settings: &settings,
            balance: dec!(10000),
            equity: dec!(9950),
            cycle: None,
            baseline: &baseline,
            snapshot_in_secs: 3599,
            rebalance_in_secs: 120,
        });

        assert!(text.starts_with("2026-03-02 12:00:00 UTC\n"));
        assert!(text.contains("capital basis = Balance"));
        assert!(text.contains("change = -0.5%"));
        assert!(text.contains("Next equity snapshot in 3599 s"));
        assert!(text.ends_with("Next rebalance in 120 s\n"));
    }

    #[test]
    fn test_halt_report() {
        let text = render_halt(&HaltRecord {
            drawdown_percent: dec!(6),
            threshold_percent: dec!(5),
            baseline: CapitalBaseline {
                equity: dec!(10000),
                captured_at: t0(),
            },
            equity: dec!(9400),
            halted_at: t0(),
        });

        assert!(text.contains("Equity drawdown = 6% reached the stop of 5%"));
        assert!(text.contains("Saved equity = 10000"));
        assert!(text.ends_with("Engine has been halted!\n"));
    }

    #[test]
    fn test_memory_sink_groups_writes_per_flush() {
        let mut sink = MemoryStatusSink::default();
        let handle = sink.clone();

        sink.write_status("a\n");
        sink.write_status("b\n");
        sink.flush();
        sink.write_status("c\n");
        sink.flush();

        assert_eq!(handle.reports(), vec!["a\nb\n".to_string(), "c\n".to_string()]);
    }
}
