//! Rebalancing strategy implementation.
//!
//! Contains the core logic for:
//! - Market regime classification on the benchmark
//! - Momentum scanning and candidate ranking
//! - Target weights under position caps and volatility targeting
//! - Rebalance scheduling and order delta planning

mod allocator;
mod cycle;
mod plan;
mod rebalancer;
mod regime;
mod scanner;
mod schedule;

pub use allocator::{cap_and_redistribute, AllocationEngine, ClipOutcome, TargetWeights};
pub use cycle::{trailing_portfolio_returns, CycleGuard, CycleOutcome, CyclePermit, RebalanceCycle};
pub use plan::{AllocationPlan, Candidate, PlanWarning};
pub use rebalancer::{OrderPlan, OrderPlanner, OrderSide, RebalanceOrder};
pub use regime::{Regime, RegimeClassifier, RegimeReading};
pub use scanner::{trend_quality_score, Exclusion, ExclusionReason, MomentumScanner, ScanResult};
pub use schedule::{RebalanceSchedule, RebalanceTrigger};
