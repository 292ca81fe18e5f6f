//! Strength indicators: ADX.

use super::volatility::true_range;
use crate::data::PriceBar;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Average Directional Index (Wilder), 0-100 scale.
///
/// Directional movement is smoothed over `period` bars, then DX is averaged
/// over another `period`, so at least `2 * period` bars are required.
pub fn adx(bars: &[PriceBar], period: usize) -> Option<Decimal> {
    let n = bars.len();
    if period == 0 || n < 2 * period {
        return None;
    }

    let mut plus_dm = vec![Decimal::ZERO; n];
    let mut minus_dm = vec![Decimal::ZERO; n];
    let mut tr = vec![Decimal::ZERO; n];

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;

        if up_move > down_move && up_move > Decimal::ZERO {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > Decimal::ZERO {
            minus_dm[i] = down_move;
        }
        tr[i] = true_range(bars[i].high, bars[i].low, bars[i - 1].close);
    }

    let period_dec = Decimal::from(period);
    let mut smooth_plus: Decimal = plus_dm[1..=period].iter().copied().sum();
    let mut smooth_minus: Decimal = minus_dm[1..=period].iter().copied().sum();
    let mut smooth_tr: Decimal = tr[1..=period].iter().copied().sum();

    let mut dx = vec![Decimal::ZERO; n];
    dx[period] = directional_index(smooth_plus, smooth_minus, smooth_tr);

    for i in (period + 1)..n {
        smooth_plus = smooth_plus - smooth_plus / period_dec + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_dec + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_dec + tr[i];
        dx[i] = directional_index(smooth_plus, smooth_minus, smooth_tr);
    }

    let adx_start = 2 * period - 1;
    let mut value: Decimal = dx[period..=adx_start].iter().copied().sum::<Decimal>() / period_dec;
    for dx_value in &dx[(adx_start + 1)..] {
        value = (value * (period_dec - Decimal::ONE) + dx_value) / period_dec;
    }

    Some(value)
}

fn directional_index(plus_dm: Decimal, minus_dm: Decimal, tr: Decimal) -> Decimal {
    if tr <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let plus_di = dec!(100) * plus_dm / tr;
    let minus_di = dec!(100) * minus_dm / tr;
    let di_sum = plus_di + minus_di;
    if di_sum <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    dec!(100) * (plus_di - minus_di).abs() / di_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trending_bars(n: usize, step: Decimal) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = dec!(100) + step * Decimal::from(i);
                PriceBar {
                    timestamp: start + Duration::days(i as i64),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                }
            })
            .collect()
    }

    #[test]
    fn test_adx_requires_two_periods() {
        let bars = trending_bars(27, dec!(1));
        assert!(adx(&bars, 14).is_none());
        assert!(adx(&trending_bars(28, dec!(1)), 14).is_some());
    }

    #[test]
    fn test_adx_strong_uptrend() {
        // Every bar makes a higher high and higher low: only +DM, DX = 100
        let value = adx(&trending_bars(60, dec!(2)), 14).unwrap();
        assert!(value > dec!(99.999) && value <= dec!(100.000001));
    }

    #[test]
    fn test_adx_flat_market() {
        let value = adx(&trending_bars(40, Decimal::ZERO), 14).unwrap();
        assert_eq!(value, Decimal::ZERO);
    }
}
