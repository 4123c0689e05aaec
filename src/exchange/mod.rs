//! Trading host integration.
//!
//! The engine consumes the [`TradingHost`] trait only. A paper trading
//! host is bundled for simulation runs and tests:
//! - Market data (best price per side)
//! - Tiered, non-linear margin oracle
//! - Order execution with partial fills and injectable faults
//! - Account state (net positions, balance, equity)

pub mod mock;
mod traits;
mod types;

pub use mock::{PaperInstrument, PaperTradingHost};
pub use traits::TradingHost;
#[cfg(test)]
pub use traits::MockTradingHost;
pub use types::*;
