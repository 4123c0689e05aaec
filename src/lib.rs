//! # Portfolio Rebalancer
//!
//! Continuously steers a trading account's exposure toward a declared
//! target allocation, sizing orders through the host's non-linear margin
//! function and halting on an equity drawdown stop.
//!
//! ## Architecture
//!
//! - `allocation`: Target allocation table, percent parsing and validation
//! - `config`: Configuration management and validation
//! - `engine`: Control loop, periodic triggers, cycle fan-out and status
//! - `exchange`: Trading host boundary and the paper trading host
//! - `strategy`: Margin delta, volume search and order reconciliation
//! - `risk`: Equity drawdown circuit breaker
//! - `utils`: Shared utilities and decimal arithmetic

pub mod allocation;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
