//! Order planning: turns an allocation plan and a holdings snapshot into
//! buy/sell deltas for the execution layer.

use super::plan::AllocationPlan;
use crate::config::OrderConfig;
use crate::utils::decimal;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// One order moving a position toward its target weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOrder {
    pub symbol: String,
    pub side: OrderSide,
    /// Quantity rounded down to the lot size
    pub quantity: Decimal,
    /// Reference price used for sizing
    pub price: Decimal,
    /// quantity × price
    pub notional: Decimal,
    pub current_weight: Decimal,
    pub target_weight: Decimal,
}

/// Orders for one plan, sells first so that proceeds fund the buys.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderPlan {
    /// Cash plus the value of every priced holding
    pub equity: Decimal,
    pub orders: Vec<RebalanceOrder>,
    /// Symbols without a reference price; left untouched
    pub unpriced: Vec<String>,
}

impl OrderPlan {
    pub fn sells(&self) -> impl Iterator<Item = &RebalanceOrder> {
        self.orders.iter().filter(|o| o.side == OrderSide::Sell)
    }

    pub fn buys(&self) -> impl Iterator<Item = &RebalanceOrder> {
        self.orders.iter().filter(|o| o.side == OrderSide::Buy)
    }
}

/// Computes order deltas between current holdings and a target plan.
pub struct OrderPlanner {
    config: OrderConfig,
}

impl OrderPlanner {
    /// Create a new order planner.
    pub fn new(config: OrderConfig) -> Self {
        Self { config }
    }

    /// Plan the orders that move `holdings` (symbol → quantity) to `plan`.
    ///
    /// Holdings absent from the plan are sold in full. Adjustments below
    /// `min_trade_value`, or within `drift_tolerance` of the current value,
    /// are skipped.
    pub fn plan_orders(
        &self,
        plan: &AllocationPlan,
        holdings: &HashMap<String, Decimal>,
        prices: &HashMap<String, Decimal>,
        cash: Decimal,
    ) -> OrderPlan {
        let mut unpriced = Vec::new();

        let held_value: Decimal = holdings
            .iter()
            .filter_map(|(symbol, qty)| prices.get(symbol).map(|p| *qty * *p))
            .sum();
        let equity = cash + held_value;

        let symbols: BTreeSet<&String> = plan
            .weights()
            .keys()
            .chain(holdings.iter().filter(|(_, q)| **q != Decimal::ZERO).map(|(s, _)| s))
            .collect();

        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for symbol in symbols {
            let Some(&price) = prices.get(symbol).filter(|p| **p > Decimal::ZERO) else {
                warn!(%symbol, "No reference price, leaving position untouched");
                unpriced.push(symbol.clone());
                continue;
            };

            let held_qty = holdings.get(symbol).copied().unwrap_or(Decimal::ZERO);
            let current_value = held_qty * price;
            let target_weight = plan.weight(symbol);
            let target_value = target_weight * equity;
            let current_weight = decimal::safe_div(current_value, equity);

            // Full exit: sell the exact held quantity, no thresholds
            if target_weight == Decimal::ZERO {
                if held_qty > Decimal::ZERO {
                    sells.push(RebalanceOrder {
                        symbol: symbol.clone(),
                        side: OrderSide::Sell,
                        quantity: held_qty,
                        price,
                        notional: current_value,
                        current_weight,
                        target_weight,
                    });
                }
                continue;
            }

            let delta = target_value - current_value;
            if delta.abs() < self.config.min_trade_value {
                debug!(%symbol, %delta, "Delta below minimum trade value");
                continue;
            }

            if current_value > Decimal::ZERO
                && delta.abs() / current_value < self.config.drift_tolerance
            {
                debug!(%symbol, %delta, "Position within drift tolerance");
                continue;
            }

            let side = if delta > Decimal::ZERO {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };

            let mut quantity = decimal::round_down_to_lot(delta.abs() / price, self.config.lot_size);
            if side == OrderSide::Sell {
                quantity = quantity.min(held_qty);
            }
            if quantity <= Decimal::ZERO {
                continue;
            }

            let order = RebalanceOrder {
                symbol: symbol.clone(),
                side,
                quantity,
                price,
                notional: quantity * price,
                current_weight,
                target_weight,
            };

            match side {
                OrderSide::Sell => sells.push(order),
                OrderSide::Buy => buys.push(order),
            }
        }

        let mut orders = sells;
        orders.extend(buys);

        info!(
            %equity,
            orders = orders.len(),
            unpriced = unpriced.len(),
            regime = %plan.regime(),
            "Order plan computed"
        );

        OrderPlan {
            equity,
            orders,
            unpriced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Regime;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn plan(weights: &[(&str, Decimal)]) -> AllocationPlan {
        let weights: BTreeMap<String, Decimal> =
            weights.iter().map(|(s, w)| (s.to_string(), *w)).collect();
        AllocationPlan::new(Utc::now(), Regime::StrongBull, weights, None, None, Vec::new())
    }

    fn map(entries: &[(&str, Decimal)]) -> HashMap<String, Decimal> {
        entries.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    fn planner() -> OrderPlanner {
        OrderPlanner::new(OrderConfig::default())
    }

    #[test]
    fn test_initial_buys_from_cash() {
        let plan = plan(&[("AAPL", dec!(0.5)), ("MSFT", dec!(0.25))]);
        let prices = map(&[("AAPL", dec!(200)), ("MSFT", dec!(400))]);

        let orders = planner().plan_orders(&plan, &HashMap::new(), &prices, dec!(100_000));

        assert_eq!(orders.equity, dec!(100_000));
        assert_eq!(orders.orders.len(), 2);
        assert_eq!(orders.orders[0].symbol, "AAPL");
        assert_eq!(orders.orders[0].side, OrderSide::Buy);
        assert_eq!(orders.orders[0].quantity, dec!(250));
        assert_eq!(orders.orders[1].quantity, dec!(62)); // 25000 / 400 = 62.5 → 62
    }

    #[test]
    fn test_exit_positions_not_in_plan() {
        let plan = plan(&[("GLD", dec!(1))]);
        let holdings = map(&[("AAPL", dec!(10)), ("NVDA", dec!(3))]);
        let prices = map(&[("AAPL", dec!(200)), ("NVDA", dec!(100)), ("GLD", dec!(230))]);

        let orders = planner().plan_orders(&plan, &holdings, &prices, dec!(0));

        assert_eq!(orders.equity, dec!(2300));
        let sells: Vec<_> = orders.sells().collect();
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[0].symbol, "AAPL");
        assert_eq!(sells[0].quantity, dec!(10));
        assert_eq!(sells[1].symbol, "NVDA");

        let buys: Vec<_> = orders.buys().collect();
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].symbol, "GLD");
        assert_eq!(buys[0].quantity, dec!(10));

        // Sells come before buys
        assert_eq!(orders.orders.last().unwrap().side, OrderSide::Buy);
    }

    #[test]
    fn test_within_drift_tolerance_skipped() {
        let plan = plan(&[("AAPL", dec!(0.5))]);
        let holdings = map(&[("AAPL", dec!(49))]); // 4900 vs target 5000, 2% drift
        let prices = map(&[("AAPL", dec!(100))]);

        let orders = planner().plan_orders(&plan, &holdings, &prices, dec!(5100));
        assert!(orders.orders.is_empty());
    }

    #[test]
    fn test_trim_overweight_position() {
        let plan = plan(&[("AAPL", dec!(0.25))]);
        let holdings = map(&[("AAPL", dec!(50))]); // 5000 of 10000
        let prices = map(&[("AAPL", dec!(100))]);

        let orders = planner().plan_orders(&plan, &holdings, &prices, dec!(5000));

        assert_eq!(orders.orders.len(), 1);
        assert_eq!(orders.orders[0].side, OrderSide::Sell);
        assert_eq!(orders.orders[0].quantity, dec!(25));
        assert_eq!(orders.orders[0].current_weight, dec!(0.5));
    }

    #[test]
    fn test_small_delta_below_min_trade_value() {
        let plan = plan(&[("AAPL", dec!(0.5))]);
        let prices = map(&[("AAPL", dec!(10))]);

        let orders = planner().plan_orders(&plan, &HashMap::new(), &prices, dec!(150));
        assert!(orders.orders.is_empty());
    }

    #[test]
    fn test_unpriced_symbols_reported() {
        let plan = plan(&[("AAPL", dec!(0.5)), ("DELISTED", dec!(0.25))]);
        let prices = map(&[("AAPL", dec!(100))]);

        let orders = planner().plan_orders(&plan, &HashMap::new(), &prices, dec!(10_000));
        assert_eq!(orders.unpriced, vec!["DELISTED".to_string()]);
        assert_eq!(orders.orders.len(), 1);
    }

    #[test]
    fn test_fractional_lot_size() {
        let planner = OrderPlanner::new(OrderConfig {
            lot_size: dec!(0.001),
            ..OrderConfig::default()
        });
        let plan = plan(&[("BTCUSDT", dec!(0.25))]);
        let prices = map(&[("BTCUSDT", dec!(60000))]);

        let orders = planner.plan_orders(&plan, &HashMap::new(), &prices, dec!(10_000));
        // 2500 / 60000 = 0.041666… → 0.041
        assert_eq!(orders.orders[0].quantity, dec!(0.041));
        assert_eq!(orders.orders[0].notional, dec!(2460));
    }
}
