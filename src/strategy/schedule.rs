//! Rebalance calendar and out-of-cycle regime-change triggers.

use super::plan::AllocationPlan;
use super::Regime;
use crate::config::ScheduleConfig;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::fmt;

/// Why a rebalance cycle is producing a new plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger")]
pub enum RebalanceTrigger {
    /// No previous plan exists
    Initial,
    /// Calendar rebalance month reached
    Scheduled,
    /// Daily check found a different regime than the last plan
    RegimeChange { from: Regime, to: Regime },
    /// Operator override
    Forced,
}

impl fmt::Display for RebalanceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceTrigger::Initial => write!(f, "initial"),
            RebalanceTrigger::Scheduled => write!(f, "scheduled"),
            RebalanceTrigger::RegimeChange { from, to } => {
                write!(f, "regime change {} -> {}", from, to)
            }
            RebalanceTrigger::Forced => write!(f, "forced"),
        }
    }
}

/// Decides whether a cycle should emit a new plan.
pub struct RebalanceSchedule {
    config: ScheduleConfig,
}

impl RebalanceSchedule {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    /// Whether `as_of` falls in a configured rebalance month.
    pub fn is_rebalance_month(&self, as_of: DateTime<Utc>) -> bool {
        self.config.rebalance_months.contains(&as_of.month())
    }

    /// Trigger for a run at `as_of`, or `None` when the last plan still stands.
    ///
    /// A scheduled rebalance fires once per rebalance month: the first run in
    /// that month whose last plan is from an earlier month.
    pub fn evaluate(
        &self,
        as_of: DateTime<Utc>,
        last_plan: Option<&AllocationPlan>,
        current_regime: Regime,
    ) -> Option<RebalanceTrigger> {
        let Some(last) = last_plan else {
            return Some(RebalanceTrigger::Initial);
        };

        let last_at = last.generated_at();
        let same_month = last_at.year() == as_of.year() && last_at.month() == as_of.month();

        if self.is_rebalance_month(as_of) && !same_month && last_at < as_of {
            return Some(RebalanceTrigger::Scheduled);
        }

        if self.config.regime_change_trigger && last.regime() != current_regime {
            return Some(RebalanceTrigger::RegimeChange {
                from: last.regime(),
                to: current_regime,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn schedule() -> RebalanceSchedule {
        RebalanceSchedule::new(ScheduleConfig::default())
    }

    fn plan_at(y: i32, m: u32, d: u32, regime: Regime) -> AllocationPlan {
        AllocationPlan::new(
            Utc.with_ymd_and_hms(y, m, d, 21, 0, 0).unwrap(),
            regime,
            BTreeMap::new(),
            None,
            None,
            Vec::new(),
        )
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_first_run_is_initial() {
        assert_eq!(
            schedule().evaluate(day(2024, 2, 14), None, Regime::Bear),
            Some(RebalanceTrigger::Initial)
        );
    }

    #[test]
    fn test_quarter_start_triggers_once() {
        let last = plan_at(2024, 1, 2, Regime::StrongBull);

        assert_eq!(
            schedule().evaluate(day(2024, 4, 1), Some(&last), Regime::StrongBull),
            Some(RebalanceTrigger::Scheduled)
        );

        // Already rebalanced this month
        let rebalanced = plan_at(2024, 4, 1, Regime::StrongBull);
        assert_eq!(
            schedule().evaluate(day(2024, 4, 2), Some(&rebalanced), Regime::StrongBull),
            None
        );
    }

    #[test]
    fn test_mid_quarter_without_regime_change_holds() {
        let last = plan_at(2024, 1, 2, Regime::StrongBull);
        assert_eq!(
            schedule().evaluate(day(2024, 2, 20), Some(&last), Regime::StrongBull),
            None
        );
    }

    #[test]
    fn test_regime_change_triggers_out_of_cycle() {
        let last = plan_at(2024, 1, 2, Regime::StrongBull);
        assert_eq!(
            schedule().evaluate(day(2024, 2, 20), Some(&last), Regime::Bear),
            Some(RebalanceTrigger::RegimeChange {
                from: Regime::StrongBull,
                to: Regime::Bear
            })
        );
    }

    #[test]
    fn test_regime_change_trigger_can_be_disabled() {
        let schedule = RebalanceSchedule::new(ScheduleConfig {
            rebalance_months: vec![1, 4, 7, 10],
            regime_change_trigger: false,
        });
        let last = plan_at(2024, 1, 2, Regime::StrongBull);
        assert_eq!(schedule.evaluate(day(2024, 2, 20), Some(&last), Regime::Bear), None);
    }

    #[test]
    fn test_same_month_previous_year_still_scheduled() {
        let last = plan_at(2023, 4, 3, Regime::WeakBull);
        assert_eq!(
            schedule().evaluate(day(2024, 4, 1), Some(&last), Regime::WeakBull),
            Some(RebalanceTrigger::Scheduled)
        );
    }

    #[test]
    fn test_trigger_display() {
        let trigger = RebalanceTrigger::RegimeChange {
            from: Regime::WeakBull,
            to: Regime::Bear,
        };
        assert_eq!(trigger.to_string(), "regime change WEAK_BULL -> BEAR");
    }
}
