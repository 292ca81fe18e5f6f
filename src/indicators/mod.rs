//! Technical indicators used for regime detection and candidate scoring.
//!
//! All functions operate on date-ordered slices and return the value at the
//! most recent bar, or `None` when the series is too short.

mod strength;
mod trend;
mod volatility;

pub use strength::adx;
pub use trend::{rate_of_change, sma};
pub use volatility::{atr, period_returns, realized_volatility, true_range};
