//! Trend indicators: SMA, rate of change.

use rust_decimal::Decimal;

/// Simple moving average of the last `period` values.
pub fn sma(data: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || data.len() < period {
        return None;
    }

    let window = &data[data.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Rate of change over `lookback` bars: `close[t] / close[t - lookback] - 1`.
///
/// Needs `lookback + 1` values. Returns `None` if the base price is not positive.
pub fn rate_of_change(data: &[Decimal], lookback: usize) -> Option<Decimal> {
    if lookback == 0 || data.len() < lookback + 1 {
        return None;
    }

    let last = data[data.len() - 1];
    let base = data[data.len() - 1 - lookback];
    if base <= Decimal::ZERO {
        return None;
    }

    Some(last / base - Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sma_uses_trailing_window() {
        let data = vec![dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)];
        assert_eq!(sma(&data, 3), Some(dec!(4)));
        assert_eq!(sma(&data, 5), Some(dec!(3)));
        assert_eq!(sma(&data, 6), None);
        assert_eq!(sma(&data, 0), None);
    }

    #[test]
    fn test_rate_of_change() {
        let data = vec![dec!(100), dec!(105), dec!(110), dec!(120)];
        assert_eq!(rate_of_change(&data, 3), Some(dec!(0.2)));
        assert_eq!(rate_of_change(&data, 1), Some(dec!(120) / dec!(110) - Decimal::ONE));
        assert_eq!(rate_of_change(&data, 4), None);
    }

    #[test]
    fn test_rate_of_change_zero_base() {
        let data = vec![dec!(0), dec!(10)];
        assert_eq!(rate_of_change(&data, 1), None);
    }
}
