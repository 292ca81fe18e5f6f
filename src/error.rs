//! Error types for the allocation engine and its drivers.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the allocation engine, the scanner and the cycle driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A price series is shorter than the longest lookback it feeds.
    #[error("Insufficient history for {symbol}: need at least {required} bars, got {available}")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    /// Fewer eligible candidates than the regime's target position count.
    #[error("Insufficient candidates: regime requires {required}, only {available} eligible")]
    InsufficientCandidates { required: usize, available: usize },

    /// Constraints are invalid or mathematically infeasible.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Another rebalance cycle holds the single-flight lock.
    #[error("Rebalance cycle already in progress")]
    CycleInProgress,
}

impl EngineError {
    /// Create an insufficient history error.
    pub fn insufficient_history(symbol: impl Into<String>, required: usize, available: usize) -> Self {
        Self::InsufficientHistory {
            symbol: symbol.into(),
            required,
            available,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the error should stop the process before any cycle runs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvalidConfig { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::insufficient_history("AAPL", 200, 150);
        assert_eq!(
            err.to_string(),
            "Insufficient history for AAPL: need at least 200 bars, got 150"
        );

        let err = EngineError::invalid_config("max_position_weight * 4 < 1");
        assert!(err.to_string().contains("max_position_weight"));
        assert!(err.is_fatal());
        assert!(!EngineError::CycleInProgress.is_fatal());
    }
}
