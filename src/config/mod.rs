//! Configuration management for the momentum rebalancer.
//!
//! Loads settings from environment variables and config files.

use crate::error::{EngineError, EngineResult};
use crate::strategy::Regime;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Benchmark and tradeable universe
    #[serde(default)]
    pub universe: UniverseConfig,
    /// Position caps, regime position counts and weighting
    #[serde(default)]
    pub risk: RiskConfig,
    /// Volatility targeting
    #[serde(default)]
    pub volatility: VolatilityConfig,
    /// Regime classification moving averages
    #[serde(default)]
    pub regime: RegimeConfig,
    /// Candidate scoring and eligibility filters
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Rebalance calendar and out-of-cycle triggers
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Order delta generation
    #[serde(default)]
    pub orders: OrderConfig,
    /// Plan history storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Benchmark symbol used for regime detection (e.g., "SPY", "BTCUSDT")
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    /// Tradeable symbols; empty means every symbol the price source knows
    /// apart from the benchmark and the bear substitute asset
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// How raw weights are derived from the selected candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingScheme {
    /// 1/N for every selected candidate
    Equal,
    /// Proportional to the candidate score
    Momentum,
}

/// What to do when fewer eligible candidates exist than the regime asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Allocate to the available subset and attach a warning (default)
    AllocateAvailable,
    /// Fail the cycle with `InsufficientCandidates`
    Strict,
}

/// Target position count per regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimePositions {
    #[serde(default = "default_strong_bull_positions")]
    pub strong_bull: usize,
    #[serde(default = "default_weak_bull_positions")]
    pub weak_bull: usize,
    #[serde(default)]
    pub bear: usize,
}

impl RegimePositions {
    /// Look up the target count for a regime.
    pub fn for_regime(&self, regime: Regime) -> usize {
        match regime {
            Regime::StrongBull => self.strong_bull,
            Regime::WeakBull => self.weak_bull,
            Regime::Bear => self.bear,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum weight of a single position (0.0-1.0)
    #[serde(default = "default_max_position_weight")]
    pub max_position_weight: Decimal,
    /// Defensive asset that receives 100% in regimes with zero positions
    #[serde(default = "default_bear_substitute_asset")]
    pub bear_substitute_asset: String,
    /// Target position count per regime
    #[serde(default)]
    pub positions: RegimePositions,
    /// Equal or momentum (score-proportional) weighting
    #[serde(default = "default_weighting")]
    pub weighting: WeightingScheme,
    /// Behaviour when the eligible pool is smaller than the target count
    #[serde(default = "default_shortfall_policy")]
    pub shortfall_policy: ShortfallPolicy,
    /// Iteration cap for the clip/redistribute loop
    #[serde(default = "default_max_clip_iterations")]
    pub max_clip_iterations: u32,
    /// Upper bound on the sum of invested weights (no leverage)
    #[serde(default = "default_max_gross_exposure")]
    pub max_gross_exposure: Decimal,
    /// Decimal places kept in emitted weights (truncated toward zero)
    #[serde(default = "default_weight_decimals")]
    pub weight_decimals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// Scale the weight vector toward a target annual volatility
    #[serde(default)]
    pub enabled: bool,
    /// Target annualized portfolio volatility (e.g., 0.20 = 20%)
    #[serde(default = "default_target_annual_vol")]
    pub target_annual_vol: Decimal,
    /// Trailing window of portfolio returns used for realized volatility
    #[serde(default = "default_vol_window")]
    pub window: usize,
    /// Lower clip bound of the scalar
    #[serde(default)]
    pub min_scalar: Decimal,
    /// Upper clip bound of the scalar
    #[serde(default = "default_max_scalar")]
    pub max_scalar: Decimal,
    /// Periods per year used for annualization (252 for daily equity bars, 365 for crypto)
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Short moving average period on the benchmark
    #[serde(default = "default_short_ma")]
    pub short_ma: usize,
    /// Long moving average period on the benchmark
    #[serde(default = "default_long_ma")]
    pub long_ma: usize,
}

/// Score used to rank candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Trailing rate of change over `roc_lookback` bars
    RateOfChange,
    /// (close - SMA) / ATR scaled by trend strength (ADX / 25, capped at 2)
    TrendQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_scoring_method")]
    pub method: ScoringMethod,
    /// Rate-of-change lookback in bars
    #[serde(default = "default_roc_lookback")]
    pub roc_lookback: usize,
    /// Moving average period for the trend-quality score
    #[serde(default = "default_tqs_ma_period")]
    pub ma_period: usize,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    /// Candidates must close above this SMA (0 = filter disabled)
    #[serde(default = "default_trend_filter_period")]
    pub trend_filter_period: usize,
    /// Minimum ADX for eligibility (0 = filter disabled)
    #[serde(default)]
    pub min_adx: Decimal,
    /// Candidates must score strictly above this value
    #[serde(default)]
    pub min_score: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Calendar months (1-12) in which a scheduled rebalance is due
    #[serde(default = "default_rebalance_months")]
    pub rebalance_months: Vec<u32>,
    /// Re-run out of cycle when the regime differs from the last plan's
    #[serde(default = "default_regime_change_trigger")]
    pub regime_change_trigger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// Skip orders whose notional is below this amount
    #[serde(default = "default_min_trade_value")]
    pub min_trade_value: Decimal,
    /// Skip adjustments to held positions within this relative drift (0.05 = 5%)
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: Decimal,
    /// Quantity step (1 for whole shares, e.g. 0.0001 for crypto)
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding emitted plans
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Seconds after which a cycle lock left by a crashed run is taken over
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
}

// Default value functions
fn default_benchmark() -> String {
    "SPY".to_string()
}

fn default_strong_bull_positions() -> usize {
    7
}

fn default_weak_bull_positions() -> usize {
    4 // 4 × 0.25 cap reaches full allocation
}

fn default_max_position_weight() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_bear_substitute_asset() -> String {
    "GLD".to_string()
}

fn default_weighting() -> WeightingScheme {
    WeightingScheme::Equal
}

fn default_shortfall_policy() -> ShortfallPolicy {
    ShortfallPolicy::AllocateAvailable
}

fn default_max_clip_iterations() -> u32 {
    10
}

fn default_max_gross_exposure() -> Decimal {
    Decimal::ONE
}

fn default_weight_decimals() -> u32 {
    8
}

fn default_target_annual_vol() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

fn default_vol_window() -> usize {
    20
}

fn default_max_scalar() -> Decimal {
    Decimal::TWO
}

fn default_periods_per_year() -> u32 {
    252
}

fn default_short_ma() -> usize {
    50
}

fn default_long_ma() -> usize {
    200
}

fn default_scoring_method() -> ScoringMethod {
    ScoringMethod::RateOfChange
}

fn default_roc_lookback() -> usize {
    100
}

fn default_tqs_ma_period() -> usize {
    50
}

fn default_atr_period() -> usize {
    14
}

fn default_adx_period() -> usize {
    14
}

fn default_trend_filter_period() -> usize {
    100
}

fn default_rebalance_months() -> Vec<u32> {
    vec![1, 4, 7, 10] // Quarterly
}

fn default_regime_change_trigger() -> bool {
    true
}

fn default_min_trade_value() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_drift_tolerance() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_lot_size() -> Decimal {
    Decimal::ONE
}

fn default_db_path() -> String {
    "data/plans.db".to_string()
}

fn default_lock_stale_after_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("MRB")
                    .list_separator(",")
                    .with_list_parse_key("universe.symbols")
                    .with_list_parse_key("schedule.rebalance_months")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate every section. Any failure is fatal before a cycle runs.
    pub fn validate(&self) -> EngineResult<()> {
        if self.universe.benchmark.trim().is_empty() {
            return Err(EngineError::invalid_config("benchmark symbol must not be empty"));
        }

        self.risk.validate()?;
        self.volatility.validate()?;
        self.regime.validate()?;
        self.scoring.validate()?;
        self.schedule.validate()?;
        self.orders.validate()?;

        Ok(())
    }
}

impl RiskConfig {
    /// Check that the cap can reach full allocation in every invested regime.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_position_weight <= Decimal::ZERO || self.max_position_weight > Decimal::ONE {
            return Err(EngineError::invalid_config(format!(
                "max_position_weight must be in (0, 1], got {}",
                self.max_position_weight
            )));
        }

        if self.bear_substitute_asset.trim().is_empty() {
            return Err(EngineError::invalid_config(
                "bear_substitute_asset must not be empty",
            ));
        }

        if self.positions.bear != 0 {
            return Err(EngineError::invalid_config(format!(
                "bear regime must hold 0 positions (substitute asset only), got {}",
                self.positions.bear
            )));
        }

        for regime in [Regime::StrongBull, Regime::WeakBull] {
            let n = self.positions.for_regime(regime);
            if n > 0 && self.max_position_weight * Decimal::from(n) < Decimal::ONE {
                return Err(EngineError::invalid_config(format!(
                    "max_position_weight {} × {} positions ({}) cannot reach full allocation",
                    self.max_position_weight, n, regime
                )));
            }
        }

        if self.max_clip_iterations == 0 {
            return Err(EngineError::invalid_config("max_clip_iterations must be >= 1"));
        }

        if self.max_gross_exposure <= Decimal::ZERO || self.max_gross_exposure > Decimal::ONE {
            return Err(EngineError::invalid_config(format!(
                "max_gross_exposure must be in (0, 1], got {}",
                self.max_gross_exposure
            )));
        }

        if self.weight_decimals == 0 || self.weight_decimals > 16 {
            return Err(EngineError::invalid_config("weight_decimals must be in 1..=16"));
        }

        Ok(())
    }
}

impl VolatilityConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.target_annual_vol <= Decimal::ZERO {
            return Err(EngineError::invalid_config("target_annual_vol must be positive"));
        }
        if self.window < 2 {
            return Err(EngineError::invalid_config("volatility window must be >= 2"));
        }
        if self.min_scalar < Decimal::ZERO || self.min_scalar > self.max_scalar {
            return Err(EngineError::invalid_config(format!(
                "volatility scalar bounds must satisfy 0 <= min <= max, got [{}, {}]",
                self.min_scalar, self.max_scalar
            )));
        }
        if self.periods_per_year == 0 {
            return Err(EngineError::invalid_config("periods_per_year must be positive"));
        }

        Ok(())
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.short_ma == 0 || self.short_ma >= self.long_ma {
            return Err(EngineError::invalid_config(format!(
                "regime moving averages must satisfy 0 < short < long, got {} / {}",
                self.short_ma, self.long_ma
            )));
        }
        Ok(())
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let periods = match self.method {
            ScoringMethod::RateOfChange => [self.roc_lookback, 1, 1],
            ScoringMethod::TrendQuality => [self.ma_period, self.atr_period, self.adx_period],
        };
        if periods.contains(&0) {
            return Err(EngineError::invalid_config("scoring periods must be positive"));
        }
        if self.min_adx > Decimal::ZERO && self.adx_period == 0 {
            return Err(EngineError::invalid_config("min_adx requires a positive adx_period"));
        }
        Ok(())
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(month) = self.rebalance_months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(EngineError::invalid_config(format!(
                "rebalance month {} is outside 1..=12",
                month
            )));
        }
        Ok(())
    }
}

impl OrderConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.lot_size <= Decimal::ZERO {
            return Err(EngineError::invalid_config("lot_size must be positive"));
        }
        if self.min_trade_value < Decimal::ZERO || self.drift_tolerance < Decimal::ZERO {
            return Err(EngineError::invalid_config(
                "min_trade_value and drift_tolerance must not be negative",
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            universe: UniverseConfig::default(),
            risk: RiskConfig::default(),
            volatility: VolatilityConfig::default(),
            regime: RegimeConfig::default(),
            scoring: ScoringConfig::default(),
            schedule: ScheduleConfig::default(),
            orders: OrderConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            benchmark: default_benchmark(),
            symbols: Vec::new(),
        }
    }
}

impl Default for RegimePositions {
    fn default() -> Self {
        Self {
            strong_bull: default_strong_bull_positions(),
            weak_bull: default_weak_bull_positions(),
            bear: 0,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_weight: default_max_position_weight(),
            bear_substitute_asset: default_bear_substitute_asset(),
            positions: RegimePositions::default(),
            weighting: default_weighting(),
            shortfall_policy: default_shortfall_policy(),
            max_clip_iterations: default_max_clip_iterations(),
            max_gross_exposure: default_max_gross_exposure(),
            weight_decimals: default_weight_decimals(),
        }
    }
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_annual_vol: default_target_annual_vol(),
            window: default_vol_window(),
            min_scalar: Decimal::ZERO,
            max_scalar: default_max_scalar(),
            periods_per_year: default_periods_per_year(),
        }
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            short_ma: default_short_ma(),
            long_ma: default_long_ma(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            method: default_scoring_method(),
            roc_lookback: default_roc_lookback(),
            ma_period: default_tqs_ma_period(),
            atr_period: default_atr_period(),
            adx_period: default_adx_period(),
            trend_filter_period: default_trend_filter_period(),
            min_adx: Decimal::ZERO,
            min_score: Decimal::ZERO,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rebalance_months: default_rebalance_months(),
            regime_change_trigger: default_regime_change_trigger(),
        }
    }
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            min_trade_value: default_min_trade_value(),
            drift_tolerance: default_drift_tolerance(),
            lot_size: default_lot_size(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_infeasible_cap_rejected() {
        let mut config = Config::default();
        config.risk.positions.weak_bull = 3; // 3 × 0.25 = 0.75

        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
        assert!(err.to_string().contains("WEAK_BULL"));
    }

    #[test]
    fn test_cap_exactly_reaching_full_allocation_is_valid() {
        let mut config = Config::default();
        config.risk.max_position_weight = dec!(0.25);
        config.risk.positions.strong_bull = 4;
        config.risk.positions.weak_bull = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_positions_skip_feasibility_check() {
        let mut config = Config::default();
        config.risk.positions.weak_bull = 0; // Weak bull goes to the substitute asset
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bear_positions_must_be_zero() {
        let mut config = Config::default();
        config.risk.positions.bear = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_volatility_bounds_checked_only_when_enabled() {
        let mut config = Config::default();
        config.volatility.min_scalar = dec!(3);
        assert!(config.validate().is_ok());

        config.volatility.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_regime_moving_averages_ordered() {
        let mut config = Config::default();
        config.regime.short_ma = 200;
        config.regime.long_ma = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_rebalance_month() {
        let mut config = Config::default();
        config.schedule.rebalance_months = vec![1, 13];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "risk": { "max_position_weight": "0.2", "weighting": "momentum",
                      "positions": { "strong_bull": 10, "weak_bull": 5 } },
            "scoring": { "method": "trend_quality" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.risk.max_position_weight, dec!(0.2));
        assert_eq!(config.risk.weighting, WeightingScheme::Momentum);
        assert_eq!(config.risk.positions.strong_bull, 10);
        assert_eq!(config.risk.positions.bear, 0);
        assert_eq!(config.risk.bear_substitute_asset, "GLD");
        assert_eq!(config.scoring.method, ScoringMethod::TrendQuality);
        assert_eq!(config.volatility.window, 20);
        assert!(config.validate().is_ok());
    }
}
