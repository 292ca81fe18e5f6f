//! Momentum scanner: scores the universe and filters it to eligible candidates.

use super::plan::Candidate;
use crate::config::{ScoringConfig, ScoringMethod};
use crate::data::{closes, PriceBar};
use crate::error::EngineError;
use crate::indicators::{adx, atr, rate_of_change, sma};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// ADX level treated as a fully established trend in the trend-quality score.
const ADX_REFERENCE: Decimal = dec!(25);
/// Cap on the ADX multiplier in the trend-quality score.
const MAX_ADX_FACTOR: Decimal = dec!(2);

/// Reasons for excluding an instrument from ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason")]
pub enum ExclusionReason {
    /// Series shorter than the longest lookback
    InsufficientHistory { required: usize, available: usize },
    /// Last close at or below the trend filter SMA
    BelowTrendFilter { close: Decimal, sma: Decimal },
    /// ADX below the configured minimum
    WeakTrend { adx: Decimal },
    /// Score at or below the configured minimum
    LowScore { score: Decimal },
    /// Non-positive price or zero ATR, no meaningful score
    DegenerateSeries,
}

/// An instrument left out of the ranking, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub symbol: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Scan output: eligible candidates ranked best first, plus exclusions.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub candidates: Vec<Candidate>,
    pub exclusions: Vec<Exclusion>,
}

/// Scores instruments and applies the eligibility filters.
pub struct MomentumScanner {
    config: ScoringConfig,
}

impl MomentumScanner {
    /// Create a new scanner with the given configuration.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Bars needed before an instrument can be scored and filtered.
    pub fn required_history(&self) -> usize {
        let score_bars = match self.config.method {
            ScoringMethod::RateOfChange => self.config.roc_lookback + 1,
            ScoringMethod::TrendQuality => self
                .config
                .ma_period
                .max(self.config.atr_period + 1)
                .max(2 * self.config.adx_period),
        };

        let adx_bars = if self.config.min_adx > Decimal::ZERO {
            2 * self.config.adx_period
        } else {
            0
        };

        score_bars.max(self.config.trend_filter_period).max(adx_bars)
    }

    /// Score every series and return the eligible candidates sorted by
    /// score descending, then symbol ascending.
    pub fn scan(&self, universe: &BTreeMap<String, Vec<PriceBar>>) -> ScanResult {
        let mut result = ScanResult::default();

        for (symbol, bars) in universe {
            match self.evaluate(symbol, bars) {
                Ok(candidate) => result.candidates.push(candidate),
                Err(reason) => {
                    if let ExclusionReason::InsufficientHistory {
                        required,
                        available,
                    } = reason
                    {
                        let err = EngineError::insufficient_history(symbol, required, available);
                        warn!(%symbol, "Excluding candidate: {}", err);
                    }
                    result.exclusions.push(Exclusion {
                        symbol: symbol.clone(),
                        reason,
                    });
                }
            }
        }

        result
            .candidates
            .sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));

        let count = |f: fn(&ExclusionReason) -> bool| {
            result.exclusions.iter().filter(|e| f(&e.reason)).count()
        };
        info!(
            total_scanned = universe.len(),
            eligible = result.candidates.len(),
            rejected_history = count(|r| matches!(r, ExclusionReason::InsufficientHistory { .. })),
            rejected_trend_filter = count(|r| matches!(r, ExclusionReason::BelowTrendFilter { .. })),
            rejected_weak_trend = count(|r| matches!(r, ExclusionReason::WeakTrend { .. })),
            rejected_low_score = count(|r| matches!(r, ExclusionReason::LowScore { .. })),
            rejected_degenerate = count(|r| matches!(r, ExclusionReason::DegenerateSeries)),
            "Momentum scan complete"
        );

        result
    }

    /// Score a single series, returning the exclusion reason if it does not qualify.
    pub fn evaluate(&self, symbol: &str, bars: &[PriceBar]) -> Result<Candidate, ExclusionReason> {
        let required = self.required_history();
        if bars.len() < required {
            return Err(ExclusionReason::InsufficientHistory {
                required,
                available: bars.len(),
            });
        }

        let series = closes(bars);
        let price = *series.last().ok_or(ExclusionReason::DegenerateSeries)?;
        if price <= Decimal::ZERO {
            return Err(ExclusionReason::DegenerateSeries);
        }

        if self.config.trend_filter_period > 0 {
            let filter = sma(&series, self.config.trend_filter_period)
                .ok_or(ExclusionReason::DegenerateSeries)?;
            if price <= filter {
                trace!(symbol, %price, sma = %filter, "Below trend filter");
                return Err(ExclusionReason::BelowTrendFilter {
                    close: price,
                    sma: filter,
                });
            }
        }

        let atr_value = atr(bars, self.config.atr_period);
        let adx_value = adx(bars, self.config.adx_period);

        if self.config.min_adx > Decimal::ZERO {
            let value = adx_value.unwrap_or(Decimal::ZERO);
            if value < self.config.min_adx {
                trace!(symbol, adx = %value, "ADX below threshold");
                return Err(ExclusionReason::WeakTrend { adx: value });
            }
        }

        let score = match self.config.method {
            ScoringMethod::RateOfChange => rate_of_change(&series, self.config.roc_lookback)
                .ok_or(ExclusionReason::DegenerateSeries)?,
            ScoringMethod::TrendQuality => {
                let ma = sma(&series, self.config.ma_period).ok_or(ExclusionReason::DegenerateSeries)?;
                let range = atr_value
                    .filter(|v| *v > Decimal::ZERO)
                    .ok_or(ExclusionReason::DegenerateSeries)?;
                let strength = adx_value.unwrap_or(Decimal::ZERO);
                trend_quality_score(price, ma, range, strength)
            }
        };

        if score <= self.config.min_score {
            trace!(symbol, %score, "Score below threshold");
            return Err(ExclusionReason::LowScore { score });
        }

        debug!(symbol, %score, %price, "Candidate qualified");

        Ok(Candidate {
            symbol: symbol.to_string(),
            score,
            price,
            atr: atr_value,
            adx: adx_value,
        })
    }
}

/// `(close - ma) / atr`, scaled by `min(adx / 25, 2)`.
pub fn trend_quality_score(close: Decimal, ma: Decimal, atr: Decimal, adx: Decimal) -> Decimal {
    if atr <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let distance = (close - ma) / atr;
    let factor = (adx / ADX_REFERENCE).min(MAX_ADX_FACTOR).max(Decimal::ZERO);
    distance * factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn roc_config() -> ScoringConfig {
        ScoringConfig {
            method: ScoringMethod::RateOfChange,
            roc_lookback: 10,
            ma_period: 10,
            atr_period: 5,
            adx_period: 5,
            trend_filter_period: 20,
            min_adx: Decimal::ZERO,
            min_score: Decimal::ZERO,
        }
    }

    /// Linear series from `start` moving `step` per bar, with ±1 highs/lows.
    fn linear(n: usize, start: Decimal, step: Decimal) -> Vec<PriceBar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = start + step * Decimal::from(i);
                PriceBar {
                    timestamp: t0 + Duration::days(i as i64),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                }
            })
            .collect()
    }

    fn universe(entries: Vec<(&str, Vec<PriceBar>)>) -> BTreeMap<String, Vec<PriceBar>> {
        entries
            .into_iter()
            .map(|(s, bars)| (s.to_string(), bars))
            .collect()
    }

    // =========================================================================
    // Required History Tests
    // =========================================================================

    #[test]
    fn test_required_history_rate_of_change() {
        let scanner = MomentumScanner::new(roc_config());
        assert_eq!(scanner.required_history(), 20); // trend filter dominates

        let mut config = roc_config();
        config.trend_filter_period = 0;
        assert_eq!(MomentumScanner::new(config).required_history(), 11);
    }

    #[test]
    fn test_required_history_trend_quality() {
        let mut config = roc_config();
        config.method = ScoringMethod::TrendQuality;
        config.trend_filter_period = 0;
        config.adx_period = 14;
        assert_eq!(MomentumScanner::new(config).required_history(), 28);
    }

    #[test]
    fn test_default_required_history() {
        // 100-bar ROC and 100-bar trend filter
        let scanner = MomentumScanner::new(ScoringConfig::default());
        assert_eq!(scanner.required_history(), 101);
    }

    // =========================================================================
    // Scan Tests
    // =========================================================================

    #[test]
    fn test_scan_ranks_by_rate_of_change() {
        let scanner = MomentumScanner::new(roc_config());
        let result = scanner.scan(&universe(vec![
            ("SLOW", linear(30, dec!(100), dec!(0.5))),
            ("FAST", linear(30, dec!(100), dec!(2))),
            ("MID", linear(30, dec!(100), dec!(1))),
        ]));

        let symbols: Vec<&str> = result.candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["FAST", "MID", "SLOW"]);
        assert!(result.exclusions.is_empty());

        let fast = &result.candidates[0];
        // close 158 vs 10 bars earlier 138
        assert_eq!(fast.score, dec!(158) / dec!(138) - Decimal::ONE);
        assert_eq!(fast.price, dec!(158));
        assert!(fast.atr.is_some());
        assert!(fast.adx.is_some());
    }

    #[test]
    fn test_scan_excludes_short_history() {
        let scanner = MomentumScanner::new(roc_config());
        let result = scanner.scan(&universe(vec![
            ("NEW", linear(15, dec!(100), dec!(1))),
            ("OLD", linear(30, dec!(100), dec!(1))),
        ]));

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(
            result.exclusions,
            vec![Exclusion {
                symbol: "NEW".to_string(),
                reason: ExclusionReason::InsufficientHistory {
                    required: 20,
                    available: 15
                },
            }]
        );
    }

    #[test]
    fn test_scan_excludes_below_trend_filter() {
        let scanner = MomentumScanner::new(roc_config());
        let result = scanner.scan(&universe(vec![(
            "DOWN",
            linear(30, dec!(200), dec!(-1)),
        )]));

        assert!(result.candidates.is_empty());
        assert!(matches!(
            result.exclusions[0].reason,
            ExclusionReason::BelowTrendFilter { .. }
        ));
    }

    #[test]
    fn test_scan_excludes_non_positive_score() {
        let mut config = roc_config();
        config.trend_filter_period = 0;
        let scanner = MomentumScanner::new(config);

        let result = scanner.scan(&universe(vec![("FLAT", linear(30, dec!(100), dec!(0)))]));
        assert_eq!(
            result.exclusions[0].reason,
            ExclusionReason::LowScore {
                score: Decimal::ZERO
            }
        );
    }

    #[test]
    fn test_min_adx_filter() {
        let mut config = roc_config();
        config.trend_filter_period = 0;
        config.min_adx = dec!(20);
        let scanner = MomentumScanner::new(config);

        // Steady uptrend: ADX near 100 passes; flat series has ADX 0
        let result = scanner.scan(&universe(vec![
            ("TREND", linear(30, dec!(100), dec!(2))),
            ("FLAT", linear(30, dec!(100), dec!(0))),
        ]));

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].symbol, "TREND");
        assert_eq!(
            result.exclusions[0].reason,
            ExclusionReason::WeakTrend {
                adx: Decimal::ZERO
            }
        );
    }

    #[test]
    fn test_trend_quality_scoring() {
        let mut config = roc_config();
        config.method = ScoringMethod::TrendQuality;
        config.trend_filter_period = 0;
        let scanner = MomentumScanner::new(config);

        let result = scanner.scan(&universe(vec![
            ("STEEP", linear(30, dec!(100), dec!(3))),
            ("GENTLE", linear(30, dec!(100), dec!(1))),
        ]));

        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.candidates[0].symbol, "STEEP");
        assert!(result.candidates.iter().all(|c| c.score > Decimal::ZERO));
    }

    #[test]
    fn test_trend_quality_score_formula() {
        // 2 ATRs above the MA with ADX 50 (factor capped at 2)
        assert_eq!(
            trend_quality_score(dec!(110), dec!(100), dec!(5), dec!(50)),
            dec!(4)
        );
        // ADX 75 still capped at factor 2
        assert_eq!(
            trend_quality_score(dec!(110), dec!(100), dec!(5), dec!(75)),
            dec!(4)
        );
        // ADX 12.5 halves the distance
        assert_eq!(
            trend_quality_score(dec!(110), dec!(100), dec!(5), dec!(12.5)),
            dec!(1)
        );
        assert_eq!(
            trend_quality_score(dec!(110), dec!(100), Decimal::ZERO, dec!(50)),
            Decimal::ZERO
        );
    }
}
