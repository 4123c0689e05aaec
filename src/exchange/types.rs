//! Type definitions for the trading host boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that adds exposure in the direction of `amount`'s sign.
    ///
    /// Zero maps to `Buy`.
    pub fn from_sign(amount: Decimal) -> Self {
        if amount >= Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// Account-level capital figure used to fund target allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapitalBasis {
    #[default]
    Balance,
    Equity,
}

impl fmt::Display for CapitalBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapitalBasis::Balance => write!(f, "Balance"),
            CapitalBasis::Equity => write!(f, "Equity"),
        }
    }
}

/// Position accounting model of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    /// One net position per instrument.
    Net,
    /// Independent positions per order.
    Gross,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::Net => write!(f, "Net"),
            AccountKind::Gross => write!(f, "Gross"),
        }
    }
}

/// Trading limits of an instrument as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub key: String,
    /// Smallest order volume the host accepts
    pub min_trade_volume: Decimal,
    /// Largest volume of a single order
    pub max_trade_volume: Decimal,
    /// Volume granularity
    pub volume_step: Decimal,
    pub contract_size: Decimal,
    pub tradable: bool,
}

/// A resting order on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub remaining_volume: Decimal,
    pub price: Decimal,
    /// Free-form label; the engine only touches orders carrying its own tag
    pub tag: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }
}

/// Net position on an instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    /// Positive = long, negative = short
    pub net_volume: Decimal,
}

impl Position {
    pub fn flat(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            net_volume: Decimal::ZERO,
        }
    }

    /// Volume held on `side`, zero if the position points the other way.
    pub fn volume_on(&self, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => self.net_volume.max(Decimal::ZERO),
            OrderSide::Sell => (-self.net_volume).max(Decimal::ZERO),
        }
    }
}

/// A new limit order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub volume: Decimal,
    pub price: Decimal,
    pub tag: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Host confirmation of an open request.
///
/// `filled_volume` is what the host committed for this request and
/// `remaining_volume` the part it did not take on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenOrderOutcome {
    pub order_id: String,
    pub filled_volume: Decimal,
    pub remaining_volume: Decimal,
}
