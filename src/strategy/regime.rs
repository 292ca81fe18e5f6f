//! Market regime classification from a benchmark's moving averages.

use crate::config::RegimeConfig;
use crate::data::{closes, PriceBar};
use crate::error::{EngineError, EngineResult};
use crate::indicators::sma;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Overall market trend state gating position count and exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    /// Benchmark above its long MA with the short MA above the long MA
    StrongBull,
    /// Benchmark above its long MA, short MA not confirming
    WeakBull,
    /// Benchmark at or below its long MA
    Bear,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::StrongBull => "STRONG_BULL",
            Regime::WeakBull => "WEAK_BULL",
            Regime::Bear => "BEAR",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Regime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRONG_BULL" => Ok(Regime::StrongBull),
            "WEAK_BULL" => Ok(Regime::WeakBull),
            "BEAR" => Ok(Regime::Bear),
            other => Err(EngineError::invalid_config(format!("unknown regime '{}'", other))),
        }
    }
}

/// Regime plus the indicator values it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: Regime,
    pub close: Decimal,
    pub short_ma: Decimal,
    pub long_ma: Decimal,
}

/// Classifies the benchmark into a [`Regime`].
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Bars needed before a classification is possible.
    pub fn required_history(&self) -> usize {
        self.config.long_ma.max(self.config.short_ma)
    }

    /// Classify the benchmark as of its last bar.
    pub fn classify(&self, benchmark: &str, bars: &[PriceBar]) -> EngineResult<RegimeReading> {
        let required = self.required_history();
        let series = closes(bars);

        let (Some(short_ma), Some(long_ma), Some(&close)) = (
            sma(&series, self.config.short_ma),
            sma(&series, self.config.long_ma),
            series.last(),
        ) else {
            return Err(EngineError::insufficient_history(benchmark, required, bars.len()));
        };

        let regime = if close > long_ma && short_ma > long_ma {
            Regime::StrongBull
        } else if close > long_ma {
            Regime::WeakBull
        } else {
            Regime::Bear
        };

        debug!(
            %benchmark,
            %close,
            %short_ma,
            %long_ma,
            %regime,
            "Classified market regime"
        );

        Ok(RegimeReading {
            regime,
            close,
            short_ma,
            long_ma,
        })
    }
}
