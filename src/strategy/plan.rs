//! Engine inputs and outputs: ranked candidates and emitted allocation plans.

use super::Regime;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One tradeable instrument at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Instrument symbol (e.g., "AAPL", "SOLUSDT")
    pub symbol: String,
    /// Ranking score (rate of change or trend-quality score)
    pub score: Decimal,
    /// Last close
    pub price: Decimal,
    /// Average true range, when it was computed
    pub atr: Option<Decimal>,
    /// Average directional index, when it was computed
    pub adx: Option<Decimal>,
}

impl Candidate {
    /// Create a candidate with only a score and price.
    pub fn new(symbol: impl Into<String>, score: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            score,
            price,
            atr: None,
            adx: None,
        }
    }
}

/// Non-fatal conditions attached to a plan for the caller to log or alert on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanWarning {
    /// Clip/redistribute hit its iteration cap with weights still above the cap
    ConstraintViolation {
        iterations: u32,
        max_weight: Decimal,
        cap: Decimal,
    },
    /// Eligible pool smaller than the regime's target count
    InsufficientCandidates { required: usize, available: usize },
    /// Not enough trailing returns to estimate realized volatility
    VolatilityUnavailable { returns_available: usize },
    /// Same symbol supplied more than once; the best-ranked entry was kept
    DuplicateCandidate { symbol: String },
}

impl PlanWarning {
    /// Emit warning as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        warn!(target: "plan_warning", "PLAN_WARNING: {}", json);
    }
}

/// Target weights produced once per rebalance cycle.
///
/// Weights are non-negative and sum to at most 1; the remainder is cash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    generated_at: DateTime<Utc>,
    regime: Regime,
    weights: BTreeMap<String, Decimal>,
    volatility_scalar: Option<Decimal>,
    realized_volatility: Option<Decimal>,
    warnings: Vec<PlanWarning>,
}

impl AllocationPlan {
    pub(crate) fn new(
        generated_at: DateTime<Utc>,
        regime: Regime,
        weights: BTreeMap<String, Decimal>,
        volatility_scalar: Option<Decimal>,
        realized_volatility: Option<Decimal>,
        warnings: Vec<PlanWarning>,
    ) -> Self {
        Self {
            generated_at,
            regime,
            weights,
            volatility_scalar,
            realized_volatility,
            warnings,
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Symbol to target weight, ordered by symbol.
    pub fn weights(&self) -> &BTreeMap<String, Decimal> {
        &self.weights
    }

    /// Target weight of a symbol (zero if absent).
    pub fn weight(&self, symbol: &str) -> Decimal {
        self.weights.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Scalar applied by volatility targeting, if it ran.
    pub fn volatility_scalar(&self) -> Option<Decimal> {
        self.volatility_scalar
    }

    /// Realized annualized volatility used for the scalar.
    pub fn realized_volatility(&self) -> Option<Decimal> {
        self.realized_volatility
    }

    pub fn warnings(&self) -> &[PlanWarning] {
        &self.warnings
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> Decimal {
        self.weights.values().copied().sum()
    }

    /// Implicit cash weight.
    pub fn cash_weight(&self) -> Decimal {
        (Decimal::ONE - self.total_weight()).max(Decimal::ZERO)
    }

    pub fn has_constraint_violation(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, PlanWarning::ConstraintViolation { .. }))
    }

    /// Log the plan and emit its warnings.
    pub fn log(&self) {
        info!(
            regime = %self.regime,
            positions = self.weights.len(),
            total_weight = %self.total_weight(),
            cash = %self.cash_weight(),
            volatility_scalar = ?self.volatility_scalar,
            "Allocation plan emitted"
        );
        for (symbol, weight) in &self.weights {
            info!(%symbol, %weight, "Target weight");
        }
        for warning in &self.warnings {
            warning.emit();
        }
    }
}
