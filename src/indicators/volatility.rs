//! Volatility indicators: true range, ATR, realized volatility.

use crate::data::PriceBar;
use crate::utils::decimal;
use rust_decimal::Decimal;

/// True range of a bar against the previous close.
pub fn true_range(high: Decimal, low: Decimal, prev_close: Decimal) -> Decimal {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Average True Range with Wilder's smoothing.
///
/// The first ATR is the mean of the first `period` true ranges (each needs a
/// previous close), so at least `period + 1` bars are required.
pub fn atr(bars: &[PriceBar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let ranges: Vec<Decimal> = bars
        .windows(2)
        .map(|w| true_range(w[1].high, w[1].low, w[0].close))
        .collect();

    let period_dec = Decimal::from(period);
    let mut value: Decimal = ranges[..period].iter().copied().sum::<Decimal>() / period_dec;

    for tr in &ranges[period..] {
        value = (value * (period_dec - Decimal::ONE) + tr) / period_dec;
    }

    Some(value)
}

/// Simple returns between consecutive values.
pub fn period_returns(data: &[Decimal]) -> Vec<Decimal> {
    data.windows(2)
        .map(|w| decimal::safe_div(w[1] - w[0], w[0]))
        .collect()
}

/// Annualized realized volatility of the last `window` returns.
///
/// Uses the sample standard deviation scaled by `sqrt(periods_per_year)`.
/// Fewer than `window` returns uses what is available; fewer than two gives `None`.
pub fn realized_volatility(
    returns: &[Decimal],
    window: usize,
    periods_per_year: u32,
) -> Option<Decimal> {
    let start = returns.len().saturating_sub(window);
    let sample = &returns[start..];
    if sample.len() < 2 {
        return None;
    }

    let n = Decimal::from(sample.len());
    let mean = decimal::sum(sample) / n;
    let variance = sample
        .iter()
        .map(|r| (*r - mean) * (*r - mean))
        .sum::<Decimal>()
        / (n - Decimal::ONE);

    Some(decimal::sqrt(variance * Decimal::from(periods_per_year)))
}
