//! Configuration management for the portfolio rebalancer.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::allocation::AllocationRow;
use crate::exchange::{AccountKind, CapitalBasis};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling, capital basis and circuit breaker settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Order placement parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Paper trading host simulation
    #[serde(default)]
    pub paper: PaperConfig,
    /// Target allocation table rows
    #[serde(default)]
    pub allocation: Vec<AllocationRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which account figure funds the targets
    #[serde(default)]
    pub capital_basis: CapitalBasis,
    /// Minutes between rebalance cycles
    #[serde(default = "default_rebalance_interval")]
    pub rebalance_interval_minutes: u32,
    /// Seconds between capital baseline snapshots
    #[serde(default = "default_snapshot_interval")]
    pub equity_snapshot_interval_secs: u32,
    /// Drawdown from the saved baseline, in percent, that halts the engine
    #[serde(default = "default_drawdown_stop")]
    pub equity_drawdown_stop_percent: Decimal,
    /// Seconds between control loop ticks (status refresh cadence)
    #[serde(default = "default_status_update")]
    pub status_update_secs: u64,
    /// Volume cap for allocation rows without their own max exposure
    #[serde(default)]
    pub default_max_exposure: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Attempts per cancel/open request before giving up for the cycle
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between failed attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Tag marking orders that belong to the engine
    #[serde(default = "default_order_tag")]
    pub order_tag: String,
    /// Orders expire one rebalance interval plus this many minutes after placement
    #[serde(default = "default_expiry_grace")]
    pub order_expiry_grace_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    #[serde(default = "default_account_kind")]
    pub account_kind: AccountKind,
    #[serde(default = "default_paper_instruments")]
    pub instruments: Vec<PaperInstrumentConfig>,
}

/// A simulated instrument for the paper trading host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperInstrumentConfig {
    pub key: String,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
    #[serde(default = "default_min_volume")]
    pub min_trade_volume: Decimal,
    #[serde(default = "default_max_volume")]
    pub max_trade_volume: Decimal,
    #[serde(default = "default_volume_step")]
    pub volume_step: Decimal,
    /// Leverage schedule, ordered by volume bound
    #[serde(default)]
    pub leverage_tiers: Vec<LeverageTier>,
    /// Minimum margin charged for any non-zero volume
    #[serde(default)]
    pub margin_floor: Decimal,
    #[serde(default = "default_true")]
    pub tradable: bool,
}

/// Leverage applied to the volume slice up to `up_to_volume`.
///
/// The last tier normally has no bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageTier {
    #[serde(default)]
    pub up_to_volume: Option<Decimal>,
    pub leverage: Decimal,
}

// Default value functions
fn default_rebalance_interval() -> u32 {
    60
}

fn default_snapshot_interval() -> u32 {
    3600
}

fn default_drawdown_stop() -> Decimal {
    dec!(5) // 5%
}

fn default_status_update() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    100
}

fn default_order_tag() -> String {
    "portfolio-rebalancer".to_string()
}

fn default_expiry_grace() -> u32 {
    1
}

fn default_initial_balance() -> Decimal {
    dec!(10000)
}

fn default_account_kind() -> AccountKind {
    AccountKind::Net
}

fn default_contract_size() -> Decimal {
    Decimal::ONE
}

fn default_min_volume() -> Decimal {
    dec!(0.01)
}

fn default_max_volume() -> Decimal {
    dec!(100)
}

fn default_volume_step() -> Decimal {
    dec!(0.01)
}

fn default_true() -> bool {
    true
}

fn default_paper_instruments() -> Vec<PaperInstrumentConfig> {
    let fx_tiers = vec![
        LeverageTier {
            up_to_volume: Some(dec!(5)),
            leverage: dec!(100),
        },
        LeverageTier {
            up_to_volume: Some(dec!(20)),
            leverage: dec!(50),
        },
        LeverageTier {
            up_to_volume: None,
            leverage: dec!(20),
        },
    ];

    vec![
        PaperInstrumentConfig {
            key: "EURUSD".to_string(),
            bid: dec!(1.0850),
            ask: dec!(1.0852),
            contract_size: dec!(100000),
            min_trade_volume: default_min_volume(),
            max_trade_volume: default_max_volume(),
            volume_step: default_volume_step(),
            leverage_tiers: fx_tiers.clone(),
            margin_floor: Decimal::ZERO,
            tradable: true,
        },
        PaperInstrumentConfig {
            key: "GBPUSD".to_string(),
            bid: dec!(1.2700),
            ask: dec!(1.2703),
            contract_size: dec!(100000),
            min_trade_volume: default_min_volume(),
            max_trade_volume: default_max_volume(),
            volume_step: default_volume_step(),
            leverage_tiers: fx_tiers,
            margin_floor: Decimal::ZERO,
            tradable: true,
        },
        PaperInstrumentConfig {
            key: "XAUUSD".to_string(),
            bid: dec!(2350.00),
            ask: dec!(2350.50),
            contract_size: dec!(100),
            min_trade_volume: default_min_volume(),
            max_trade_volume: dec!(50),
            volume_step: default_volume_step(),
            leverage_tiers: vec![LeverageTier {
                up_to_volume: None,
                leverage: dec!(20),
            }],
            margin_floor: dec!(5),
            tradable: true,
        },
    ]
}

impl Config {
    /// Load configuration from `.env`, a config file and environment variables.
    ///
    /// An explicit `path` must exist; the default `config` file is optional.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("REBALANCER"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.rebalance_interval_minutes > 0,
            "rebalance_interval_minutes must be positive"
        );

        anyhow::ensure!(
            self.engine.equity_snapshot_interval_secs > 0,
            "equity_snapshot_interval_secs must be positive"
        );

        anyhow::ensure!(
            self.engine.equity_drawdown_stop_percent > Decimal::ZERO
                && self.engine.equity_drawdown_stop_percent <= Decimal::ONE_HUNDRED,
            "equity_drawdown_stop_percent must be in (0, 100]"
        );

        anyhow::ensure!(
            self.engine.status_update_secs > 0,
            "status_update_secs must be positive"
        );

        if let Some(cap) = self.engine.default_max_exposure {
            anyhow::ensure!(cap > Decimal::ZERO, "default_max_exposure must be positive");
        }

        anyhow::ensure!(
            self.execution.max_attempts >= 1,
            "max_attempts must be at least 1"
        );

        anyhow::ensure!(
            !self.execution.order_tag.trim().is_empty(),
            "order_tag must not be empty"
        );

        for instrument in &self.paper.instruments {
            anyhow::ensure!(
                instrument.bid > Decimal::ZERO && instrument.ask >= instrument.bid,
                "paper instrument {} has an invalid quote",
                instrument.key
            );
            anyhow::ensure!(
                instrument.volume_step > Decimal::ZERO
                    && instrument.min_trade_volume > Decimal::ZERO
                    && instrument.max_trade_volume >= instrument.min_trade_volume,
                "paper instrument {} has invalid volume limits",
                instrument.key
            );
            validate_leverage_tiers(instrument)?;
        }

        Ok(())
    }
}

/// Leverage must be positive and bounds strictly increasing; only the last tier may be unbounded.
fn validate_leverage_tiers(instrument: &PaperInstrumentConfig) -> Result<()> {
    let mut previous = Decimal::ZERO;
    let last = instrument.leverage_tiers.len().saturating_sub(1);

    for (i, tier) in instrument.leverage_tiers.iter().enumerate() {
        anyhow::ensure!(
            tier.leverage > Decimal::ZERO,
            "paper instrument {} has a non-positive leverage {}",
            instrument.key,
            tier.leverage
        );
        match tier.up_to_volume {
            Some(bound) => {
                anyhow::ensure!(
                    bound > previous,
                    "paper instrument {} leverage tier bounds must be strictly increasing",
                    instrument.key
                );
                previous = bound;
            }
            None => anyhow::ensure!(
                i == last,
                "paper instrument {} has an unbounded leverage tier before the last one",
                instrument.key
            ),
        }
    }

    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            execution: ExecutionConfig::default(),
            paper: PaperConfig::default(),
            allocation: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capital_basis: CapitalBasis::default(),
            rebalance_interval_minutes: default_rebalance_interval(),
            equity_snapshot_interval_secs: default_snapshot_interval(),
            equity_drawdown_stop_percent: default_drawdown_stop(),
            status_update_secs: default_status_update(),
            default_max_exposure: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            order_tag: default_order_tag(),
            order_expiry_grace_minutes: default_expiry_grace(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            account_kind: default_account_kind(),
            instruments: default_paper_instruments(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.max_attempts, 5);
        assert_eq!(config.execution.retry_delay_ms, 100);
    }

    #[test]
    fn test_rejects_out_of_range_drawdown_stop() {
        let mut config = Config::default();
        config.engine.equity_drawdown_stop_percent = dec!(0);
        assert!(config.validate().is_err());

        config.engine.equity_drawdown_stop_percent = dec!(150);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = Config::default();
        config.execution.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_leverage() {
        let mut config = Config::default();
        config.paper.instruments[0].leverage_tiers = vec![LeverageTier {
            up_to_volume: None,
            leverage: dec!(0),
        }];
        assert!(config.validate().is_err());

        config.paper.instruments[0].leverage_tiers[0].leverage = dec!(-10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unordered_leverage_bounds() {
        let mut config = Config::default();
        config.paper.instruments[0].leverage_tiers = vec![
            LeverageTier {
                up_to_volume: Some(dec!(20)),
                leverage: dec!(100),
            },
            LeverageTier {
                up_to_volume: Some(dec!(5)),
                leverage: dec!(50),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_tier_before_last() {
        let mut config = Config::default();
        config.paper.instruments[0].leverage_tiers = vec![
            LeverageTier {
                up_to_volume: None,
                leverage: dec!(100),
            },
            LeverageTier {
                up_to_volume: Some(dec!(5)),
                leverage: dec!(50),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_allocation_rows() {
        let json = r#"{
            "engine": { "capital_basis": "equity", "rebalance_interval_minutes": 15 },
            "allocation": [
                { "instrument": "EURUSD", "target_percent": 40 },
                { "instrument": "GBPUSD", "target_percent": "-30%", "max_exposure": 2.5 }
            ]
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.capital_basis, CapitalBasis::Equity);
        assert_eq!(config.engine.rebalance_interval_minutes, 15);
        assert_eq!(config.engine.equity_snapshot_interval_secs, 3600);
        assert_eq!(config.allocation.len(), 2);
        assert_eq!(config.allocation[1].max_exposure, Some(dec!(2.5)));
        assert_eq!(config.paper.instruments.len(), 3);
    }
}
