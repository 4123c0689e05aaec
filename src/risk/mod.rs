//! Capital preservation.
//!
//! The equity circuit breaker compares current equity against a baseline
//! saved on its own cadence and halts the engine once the drawdown reaches
//! the configured stop.

mod breaker;

pub use breaker::{CapitalBaseline, EquityCircuitBreaker, HaltRecord};
