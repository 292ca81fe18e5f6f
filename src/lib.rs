//! # Momentum Rebalancer
//!
//! Regime-gated momentum rebalancing: classifies the market on a benchmark,
//! ranks a universe by momentum and emits capped, volatility-targeted
//! target weights once per rebalance cycle.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `data`: Price history sources and CSV loaders
//! - `indicators`: Moving averages, ATR, ADX and realized volatility
//! - `strategy`: Regime, scanning, allocation, scheduling and order planning
//! - `persistence`: SQLite-based plan history
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
