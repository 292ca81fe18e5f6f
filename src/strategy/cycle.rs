//! Rebalance cycle orchestration: regime check, schedule, scan, allocate.

use super::allocator::AllocationEngine;
use super::plan::AllocationPlan;
use super::regime::{RegimeClassifier, RegimeReading};
use super::scanner::{Exclusion, MomentumScanner};
use super::schedule::{RebalanceSchedule, RebalanceTrigger};
use crate::config::Config;
use crate::data::{closes, PriceBar, PriceSource};
use crate::error::{EngineError, EngineResult};
use crate::indicators::period_returns;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

/// In-process single-flight guard: at most one cycle may compute at a time
/// among tasks sharing this guard. Separate processes coordinate through
/// `PlanStore::try_lock_cycle`.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    lock: Arc<Mutex<()>>,
}

/// Held for the duration of one cycle.
#[derive(Debug)]
pub struct CyclePermit {
    _guard: OwnedMutexGuard<()>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit or fail with `CycleInProgress`.
    pub fn try_begin(&self) -> EngineResult<CyclePermit> {
        let guard = self
            .lock
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::CycleInProgress)?;
        Ok(CyclePermit { _guard: guard })
    }

    /// Wait for the running cycle to finish, then take the permit.
    pub async fn begin(&self) -> CyclePermit {
        CyclePermit {
            _guard: self.lock.clone().lock_owned().await,
        }
    }
}

/// Everything one cycle observed and decided.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub as_of: DateTime<Utc>,
    pub reading: RegimeReading,
    /// `None` when the previous plan still stands
    pub trigger: Option<RebalanceTrigger>,
    pub plan: Option<AllocationPlan>,
    pub exclusions: Vec<Exclusion>,
}

/// Drives one decision pass over a [`PriceSource`].
pub struct RebalanceCycle {
    benchmark: String,
    symbols: Vec<String>,
    classifier: RegimeClassifier,
    scanner: MomentumScanner,
    engine: AllocationEngine,
    schedule: RebalanceSchedule,
}

impl RebalanceCycle {
    /// Build the cycle components, failing on an invalid configuration.
    pub fn new(config: &Config) -> EngineResult<Self> {
        config.validate()?;

        Ok(Self {
            benchmark: config.universe.benchmark.clone(),
            symbols: config.universe.symbols.clone(),
            classifier: RegimeClassifier::new(config.regime.clone()),
            scanner: MomentumScanner::new(config.scoring.clone()),
            engine: AllocationEngine::new(config.risk.clone(), config.volatility.clone())?,
            schedule: RebalanceSchedule::new(config.schedule.clone()),
        })
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    /// Run one cycle as of `as_of`.
    ///
    /// Returns without a plan when neither the calendar nor a regime change
    /// calls for one, unless `force` is set.
    #[instrument(skip_all, fields(as_of = %as_of, force))]
    pub fn run(
        &self,
        source: &dyn PriceSource,
        as_of: DateTime<Utc>,
        last_plan: Option<&AllocationPlan>,
        force: bool,
    ) -> Result<CycleOutcome> {
        let benchmark_bars = source
            .history(&self.benchmark, as_of)
            .with_context(|| format!("Failed to load benchmark history for {}", self.benchmark))?;
        let reading = self.classifier.classify(&self.benchmark, &benchmark_bars)?;

        let trigger = if force {
            Some(RebalanceTrigger::Forced)
        } else {
            self.schedule.evaluate(as_of, last_plan, reading.regime)
        };

        let Some(trigger) = trigger else {
            info!(regime = %reading.regime, "No rebalance due, keeping current plan");
            return Ok(CycleOutcome {
                as_of,
                reading,
                trigger: None,
                plan: None,
                exclusions: Vec::new(),
            });
        };

        info!(regime = %reading.regime, %trigger, "Rebalance triggered");

        if self.engine.risk_config().positions.for_regime(reading.regime) == 0 {
            let plan = self.engine.allocate_at(reading.regime, &[], &[], as_of)?;
            plan.log();
            return Ok(CycleOutcome {
                as_of,
                reading,
                trigger: Some(trigger),
                plan: Some(plan),
                exclusions: Vec::new(),
            });
        }

        let mut series = BTreeMap::new();
        for symbol in self.universe(source) {
            let bars = source
                .history(&symbol, as_of)
                .with_context(|| format!("Failed to load price history for {}", symbol))?;
            series.insert(symbol, bars);
        }

        let scan = self.scanner.scan(&series);

        let volatility = self.engine.volatility_config();
        let trailing_returns = if volatility.enabled {
            let targets = self.engine.target_weights(reading.regime, &scan.candidates)?;
            trailing_portfolio_returns(&targets.weights, &series, volatility.window)
        } else {
            Vec::new()
        };

        let plan = self
            .engine
            .allocate_at(reading.regime, &scan.candidates, &trailing_returns, as_of)?;
        plan.log();

        Ok(CycleOutcome {
            as_of,
            reading,
            trigger: Some(trigger),
            plan: Some(plan),
            exclusions: scan.exclusions,
        })
    }

    /// Configured symbols, or every source symbol except the benchmark and
    /// the bear substitute.
    fn universe(&self, source: &dyn PriceSource) -> Vec<String> {
        if !self.symbols.is_empty() {
            return self.symbols.clone();
        }

        let substitute = &self.engine.risk_config().bear_substitute_asset;
        let symbols: Vec<String> = source
            .symbols()
            .into_iter()
            .filter(|s| *s != self.benchmark && s != substitute)
            .collect();
        debug!(count = symbols.len(), "Universe derived from price source");
        symbols
    }
}

/// Weighted portfolio returns over the last `window` periods, oldest first.
///
/// Series are aligned from their most recent bar. Weighted symbols without a
/// series contribute nothing; the window shrinks to the shortest series.
pub fn trailing_portfolio_returns(
    weights: &BTreeMap<String, Decimal>,
    series: &BTreeMap<String, Vec<PriceBar>>,
    window: usize,
) -> Vec<Decimal> {
    let legs: Vec<(Decimal, Vec<Decimal>)> = weights
        .iter()
        .filter_map(|(symbol, weight)| {
            series
                .get(symbol)
                .map(|bars| (*weight, period_returns(&closes(bars))))
        })
        .collect();

    let Some(len) = legs.iter().map(|(_, r)| r.len()).min() else {
        return Vec::new();
    };
    let len = len.min(window);

    (0..len)
        .map(|t| {
            legs.iter()
                .map(|(weight, returns)| *weight * returns[returns.len() - len + t])
                .sum::<Decimal>()
        })
        .collect()
}
