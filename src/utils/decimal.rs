//! Decimal arithmetic utilities for volume and capital calculations.

use rust_decimal::Decimal;

/// Round down to lot size (volume granularity).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Round down onto the grid `origin + k * step`, zero below `origin`.
pub fn round_down_to_grid(value: Decimal, origin: Decimal, step: Decimal) -> Decimal {
    if value < origin {
        return Decimal::ZERO;
    }
    origin + lots_in(value - origin, step) * step
}

/// Whole lots of `lot_size` contained in `span`, rounded down.
pub fn lots_in(span: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO || span <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (span / lot_size).floor()
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// `part` as a percent of `whole`, zero for an empty whole.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    safe_div(part, whole) * Decimal::ONE_HUNDRED
}
