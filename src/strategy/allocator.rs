//! Allocation engine: regime-gated target weights under position caps and
//! volatility targeting.
//!
//! Pure computation over its inputs; the only side effects are `tracing`
//! events.

use super::plan::{AllocationPlan, Candidate, PlanWarning};
use super::Regime;
use crate::config::{RiskConfig, ShortfallPolicy, VolatilityConfig, WeightingScheme};
use crate::error::{EngineError, EngineResult};
use crate::indicators::realized_volatility;
use crate::utils::decimal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Pre-scaling target weights and the warnings raised while building them.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetWeights {
    pub weights: BTreeMap<String, Decimal>,
    pub warnings: Vec<PlanWarning>,
}

/// Outcome of the clip/redistribute loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipOutcome {
    /// Passes that clipped at least one weight
    pub iterations: u32,
    /// No weight exceeds the cap
    pub converged: bool,
}

/// Computes [`AllocationPlan`]s from a regime, ranked candidates and risk limits.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    risk: RiskConfig,
    volatility: VolatilityConfig,
}

impl AllocationEngine {
    /// Create an engine, rejecting infeasible constraints up front.
    pub fn new(risk: RiskConfig, volatility: VolatilityConfig) -> EngineResult<Self> {
        risk.validate()?;
        volatility.validate()?;
        Ok(Self { risk, volatility })
    }

    pub fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    pub fn volatility_config(&self) -> &VolatilityConfig {
        &self.volatility
    }

    /// Compute a plan stamped with the current time.
    pub fn allocate(
        &self,
        regime: Regime,
        candidates: &[Candidate],
        trailing_returns: &[Decimal],
    ) -> EngineResult<AllocationPlan> {
        self.allocate_at(regime, candidates, trailing_returns, Utc::now())
    }

    /// Compute a plan stamped with `generated_at`.
    ///
    /// `trailing_returns` are historical returns of the weighted portfolio,
    /// oldest first; only the last `volatility.window` are used.
    pub fn allocate_at(
        &self,
        regime: Regime,
        candidates: &[Candidate],
        trailing_returns: &[Decimal],
        generated_at: DateTime<Utc>,
    ) -> EngineResult<AllocationPlan> {
        let TargetWeights {
            weights,
            mut warnings,
        } = self.target_weights(regime, candidates)?;

        if self.positions_for(regime) == 0 {
            // Defensive plan bypasses the cap and volatility scaling
            return Ok(AllocationPlan::new(
                generated_at,
                regime,
                weights,
                None,
                None,
                warnings,
            ));
        }

        let symbols: Vec<String> = weights.keys().cloned().collect();
        let mut values: Vec<Decimal> = weights.values().copied().collect();

        let mut volatility_scalar = None;
        let mut realized = None;

        if self.volatility.enabled && !values.is_empty() {
            match realized_volatility(
                trailing_returns,
                self.volatility.window,
                self.volatility.periods_per_year,
            ) {
                Some(vol) => {
                    let scalar = self.volatility_scalar(vol);
                    debug!(realized_vol = %vol, %scalar, "Applying volatility target");

                    for w in values.iter_mut() {
                        *w *= scalar;
                    }

                    volatility_scalar = Some(scalar);
                    realized = Some(vol);
                }
                None => warnings.push(PlanWarning::VolatilityUnavailable {
                    returns_available: trailing_returns.len(),
                }),
            }
        }

        self.limit_gross_exposure(&mut values);

        // Scaling up can push single names past the cap
        if volatility_scalar.is_some_and(|scalar| scalar > Decimal::ONE) {
            let outcome = cap_and_redistribute(
                &mut values,
                self.risk.max_position_weight,
                self.risk.max_clip_iterations,
            );
            if !outcome.converged {
                warnings.push(self.violation_warning(&values, outcome));
            }
        }

        let weights: BTreeMap<String, Decimal> = symbols
            .into_iter()
            .zip(values)
            .map(|(symbol, w)| {
                let w = decimal::truncate_to_precision(w, self.risk.weight_decimals);
                (symbol, w.normalize())
            })
            .filter(|(_, w)| *w > Decimal::ZERO)
            .collect();

        let plan = AllocationPlan::new(
            generated_at,
            regime,
            weights,
            volatility_scalar,
            realized,
            warnings,
        );

        info!(
            %regime,
            positions = plan.weights().len(),
            total_weight = %plan.total_weight(),
            warnings = plan.warnings().len(),
            "Allocation computed"
        );

        Ok(plan)
    }

    /// Selection, weighting and capping without volatility scaling.
    ///
    /// Regimes with zero target positions return the substitute asset at 1.0.
    pub fn target_weights(
        &self,
        regime: Regime,
        candidates: &[Candidate],
    ) -> EngineResult<TargetWeights> {
        let n = self.positions_for(regime);

        if n == 0 {
            debug!(
                %regime,
                substitute = %self.risk.bear_substitute_asset,
                "No positions for regime, allocating to substitute asset"
            );
            let mut weights = BTreeMap::new();
            weights.insert(self.risk.bear_substitute_asset.clone(), Decimal::ONE);
            return Ok(TargetWeights {
                weights,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let selected = self.select(n, candidates, &mut warnings)?;
        let mut values = self.raw_weights(&selected);

        let outcome = cap_and_redistribute(
            &mut values,
            self.risk.max_position_weight,
            self.risk.max_clip_iterations,
        );
        if !outcome.converged {
            warnings.push(self.violation_warning(&values, outcome));
        } else if outcome.iterations > 0 {
            debug!(
                iterations = outcome.iterations,
                cap = %self.risk.max_position_weight,
                "Clipped weights to position cap"
            );
        }

        let weights = selected
            .iter()
            .map(|c| c.symbol.clone())
            .zip(values)
            .collect();

        Ok(TargetWeights { weights, warnings })
    }

    /// Scalar that moves realized volatility toward the target, clipped to bounds.
    pub fn volatility_scalar(&self, realized_vol: Decimal) -> Decimal {
        if realized_vol <= Decimal::ZERO {
            return self.volatility.max_scalar;
        }
        (self.volatility.target_annual_vol / realized_vol)
            .max(self.volatility.min_scalar)
            .min(self.volatility.max_scalar)
    }

    fn positions_for(&self, regime: Regime) -> usize {
        self.risk.positions.for_regime(regime)
    }

    /// Rank by score descending, symbol ascending; keep the top `n`.
    fn select<'a>(
        &self,
        n: usize,
        candidates: &'a [Candidate],
        warnings: &mut Vec<PlanWarning>,
    ) -> EngineResult<Vec<&'a Candidate>> {
        let mut ranked: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| match self.risk.weighting {
                WeightingScheme::Momentum => c.score > Decimal::ZERO,
                WeightingScheme::Equal => true,
            })
            .collect();

        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));

        let mut seen = HashSet::new();
        ranked.retain(|c| {
            if seen.insert(c.symbol.as_str()) {
                true
            } else {
                warnings.push(PlanWarning::DuplicateCandidate {
                    symbol: c.symbol.clone(),
                });
                false
            }
        });

        if ranked.len() < n {
            match self.risk.shortfall_policy {
                ShortfallPolicy::Strict => {
                    return Err(EngineError::InsufficientCandidates {
                        required: n,
                        available: ranked.len(),
                    });
                }
                ShortfallPolicy::AllocateAvailable => {
                    warnings.push(PlanWarning::InsufficientCandidates {
                        required: n,
                        available: ranked.len(),
                    });
                }
            }
        }

        ranked.truncate(n);
        Ok(ranked)
    }

    /// Raw weights normalized to sum to 1.
    fn raw_weights(&self, selected: &[&Candidate]) -> Vec<Decimal> {
        if selected.is_empty() {
            return Vec::new();
        }

        let equal = Decimal::ONE / Decimal::from(selected.len());

        match self.risk.weighting {
            WeightingScheme::Equal => vec![equal; selected.len()],
            WeightingScheme::Momentum => {
                let total: Decimal = selected.iter().map(|c| c.score).sum();
                if total <= Decimal::ZERO {
                    return vec![equal; selected.len()];
                }
                selected.iter().map(|c| c.score / total).collect()
            }
        }
    }

    /// Scale down proportionally so the weights sum to at most `max_gross_exposure`.
    fn limit_gross_exposure(&self, values: &mut [Decimal]) {
        let gross = decimal::sum(values);
        if gross <= self.risk.max_gross_exposure {
            return;
        }

        let factor = self.risk.max_gross_exposure / gross;
        for w in values.iter_mut() {
            *w *= factor;
        }
        debug!(%gross, limit = %self.risk.max_gross_exposure, "Scaled down to gross exposure limit");
    }

    fn violation_warning(&self, values: &[Decimal], outcome: ClipOutcome) -> PlanWarning {
        PlanWarning::ConstraintViolation {
            iterations: outcome.iterations,
            max_weight: values.iter().copied().max().unwrap_or(Decimal::ZERO),
            cap: self.risk.max_position_weight,
        }
    }
}

/// Clip weights to `cap` and hand the excess to unclipped weights in
/// proportion to their size, repeating until nothing exceeds the cap or
/// `max_iterations` passes have run.
///
/// Excess that cannot be placed (every weight already at the cap) stays as cash.
pub fn cap_and_redistribute(weights: &mut [Decimal], cap: Decimal, max_iterations: u32) -> ClipOutcome {
    let mut clipped = vec![false; weights.len()];
    let mut iterations = 0;

    while iterations < max_iterations {
        let mut excess = Decimal::ZERO;
        for (w, is_clipped) in weights.iter_mut().zip(clipped.iter_mut()) {
            if *w > cap {
                excess += *w - cap;
                *w = cap;
                *is_clipped = true;
            }
        }

        if excess == Decimal::ZERO {
            break;
        }
        iterations += 1;

        let free: Vec<usize> = (0..weights.len()).filter(|&i| !clipped[i]).collect();
        if free.is_empty() {
            break;
        }

        let free_total: Decimal = free.iter().map(|&i| weights[i]).sum();
        if free_total > Decimal::ZERO {
            for &i in &free {
                weights[i] += excess * weights[i] / free_total;
            }
        } else {
            let share = excess / Decimal::from(free.len());
            for &i in &free {
                weights[i] += share;
            }
        }
    }

    ClipOutcome {
        iterations,
        converged: weights.iter().all(|w| *w <= cap),
    }
}
