//! Error types shared across the rebalancer.

use rust_decimal::Decimal;

/// Problems with the target allocation table.
///
/// Any of these rejects the whole table at startup; a table is never
/// partially accepted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("allocation row has an empty instrument key")]
    EmptyKey,

    #[error("instrument {0} is duplicated")]
    Duplicate(String),

    #[error("invalid percent value for {instrument}: '{value}'")]
    InvalidPercent { instrument: String, value: String },

    #[error("target percent for {instrument} is not a finite number: {value}")]
    NonFinitePercent { instrument: String, value: String },

    #[error("percentage sum {total}% is greater than 100%: {distribution}")]
    OverAllocated { total: Decimal, distribution: String },

    #[error("max exposure {cap} for {instrument} must be positive")]
    InvalidCap { instrument: String, cap: Decimal },

    #[error("max exposure {cap} for {instrument} is less than min trade volume {min}")]
    CapBelowMinimum {
        instrument: String,
        cap: Decimal,
        min: Decimal,
    },
}

/// Transient failure reported by the trading host for a single request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostFault {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("host unavailable")]
    Unavailable,

    #[error("order {0} not found")]
    OrderNotFound(String),

    /// The host completed the request but committed no volume.
    #[error("order completed with zero filled volume")]
    EmptyFill,
}

/// Fatal errors raised before any trading takes place.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("only net accounts are supported, host reports {0}")]
    UnsupportedAccount(String),

    #[error("allocation source error: {0}")]
    Source(String),
}
