//! Decimal arithmetic utilities for weight and order calculations.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Truncate toward zero at `decimals` places.
///
/// Used for emitted weights so that a vector summing to 1 never rounds above it.
pub fn truncate_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Lossy conversion for statistics that need `sqrt`.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert back from f64, mapping NaN/infinite to zero.
pub fn from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Square root through f64.
pub fn sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    from_f64(to_f64(value).sqrt())
}

/// Sum of a weight slice.
pub fn sum(values: &[Decimal]) -> Decimal {
    values.iter().copied().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_never_rounds_up() {
        assert_eq!(truncate_to_precision(dec!(0.142857142857), 4), dec!(0.1428));
        assert_eq!(truncate_to_precision(dec!(0.99999999999), 8), dec!(0.99999999));

        let seventh = Decimal::ONE / Decimal::from(7);
        let total: Decimal = (0..7).map(|_| truncate_to_precision(seventh, 8)).sum();
        assert!(total <= Decimal::ONE);
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(12.9), dec!(1)), dec!(12));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(1), dec!(0)), dec!(0));
        assert_eq!(safe_div(dec!(1), dec!(4)), dec!(0.25));
    }

    #[test]
    fn test_sqrt() {
        let root = sqrt(dec!(0.04));
        assert!((root - dec!(0.2)).abs() < dec!(0.0000001));
        assert_eq!(sqrt(dec!(-1)), Decimal::ZERO);
    }
}
