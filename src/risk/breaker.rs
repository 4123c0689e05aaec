//! Equity drawdown circuit breaker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use crate::utils::decimal::safe_div;

/// Last remembered equity and when it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapitalBaseline {
    pub equity: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// Why and when the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HaltRecord {
    pub drawdown_percent: Decimal,
    pub threshold_percent: Decimal,
    pub baseline: CapitalBaseline,
    pub equity: Decimal,
    pub halted_at: DateTime<Utc>,
}

/// Tracks drawdown against a periodically refreshed baseline.
///
/// Halting is one-way: once tripped the baseline is frozen and the breaker
/// stays tripped for the life of the process.
#[derive(Debug, Clone)]
pub struct EquityCircuitBreaker {
    /// Drawdown in percent that trips the breaker
    threshold_percent: Decimal,
    baseline: CapitalBaseline,
    halt: Option<HaltRecord>,
}

impl EquityCircuitBreaker {
    pub fn new(threshold_percent: Decimal, initial_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            threshold_percent,
            baseline: CapitalBaseline {
                equity: initial_equity,
                captured_at: now,
            },
            halt: None,
        }
    }

    /// Save a new baseline. Ignored once halted.
    pub fn remember(&mut self, equity: Decimal, now: DateTime<Utc>) {
        if self.halt.is_some() {
            return;
        }
        info!(%equity, previous = %self.baseline.equity, "Equity baseline saved");
        self.baseline = CapitalBaseline {
            equity,
            captured_at: now,
        };
    }

    /// `100 * (1 - current / baseline)`; zero against an empty baseline.
    pub fn drawdown_percent(&self, current: Decimal) -> Decimal {
        if self.baseline.equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        Decimal::ONE_HUNDRED * (Decimal::ONE - safe_div(current, self.baseline.equity))
    }

    /// Evaluate `current` equity. Returns true if the breaker is tripped.
    pub fn check(&mut self, current: Decimal, now: DateTime<Utc>) -> bool {
        if self.halt.is_some() {
            return true;
        }

        let drawdown = self.drawdown_percent(current);
        if drawdown < self.threshold_percent {
            return false;
        }

        error!(
            drawdown = %drawdown.round_dp(2),
            threshold = %self.threshold_percent,
            baseline = %self.baseline.equity,
            equity = %current,
            "Equity drawdown stop reached, halting"
        );

        self.halt = Some(HaltRecord {
            drawdown_percent: drawdown,
            threshold_percent: self.threshold_percent,
            baseline: self.baseline,
            equity: current,
            halted_at: now,
        });
        true
    }

    pub fn baseline(&self) -> &CapitalBaseline {
        &self.baseline
    }

    pub fn threshold_percent(&self) -> Decimal {
        self.threshold_percent
    }

    pub fn halt(&self) -> Option<&HaltRecord> {
        self.halt.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_six_percent_drawdown_trips_five_percent_stop() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), dec!(10000), t0());

        assert_eq!(breaker.drawdown_percent(dec!(9400)), dec!(6));
        assert!(breaker.check(dec!(9400), t0()));

        let halt = breaker.halt().unwrap();
        assert_eq!(halt.drawdown_percent, dec!(6));
        assert_eq!(halt.threshold_percent, dec!(5));
        assert_eq!(halt.baseline.equity, dec!(10000));
    }

    #[test]
    fn test_below_threshold_does_not_halt() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), dec!(10000), t0());

        assert!(!breaker.check(dec!(9501), t0()));
        assert!(!breaker.check(dec!(12000), t0()));
        assert!(!breaker.is_halted());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), dec!(10000), t0());
        assert!(breaker.check(dec!(9500), t0()));
    }

    #[test]
    fn test_drawdown_is_measured_from_latest_baseline() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), dec!(10000), t0());
        breaker.remember(dec!(9000), t0() + Duration::hours(1));

        // 10% below the start but under 5% below the new baseline
        assert!(!breaker.check(dec!(9000), t0() + Duration::hours(2)));
        assert_eq!(breaker.baseline().captured_at, t0() + Duration::hours(1));
    }

    #[test]
    fn test_halt_is_terminal() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), dec!(10000), t0());
        assert!(breaker.check(dec!(9000), t0()));

        breaker.remember(dec!(20000), t0() + Duration::hours(1));
        assert_eq!(breaker.baseline().equity, dec!(10000));
        assert!(breaker.check(dec!(20000), t0() + Duration::hours(1)));
        assert_eq!(breaker.halt().unwrap().halted_at, t0());
    }

    #[test]
    fn test_zero_baseline_never_trips() {
        let mut breaker = EquityCircuitBreaker::new(dec!(5), Decimal::ZERO, t0());
        assert_eq!(breaker.drawdown_percent(dec!(100)), Decimal::ZERO);
        assert!(!breaker.check(Decimal::ZERO, t0()));
    }
}
