//! PortfolioState — cash plus a single-ticker position.

use serde::{Deserialize, Serialize};

/// Portfolio state for one simulation.
///
/// Owned and mutated only by the simulator. The accounting identity must hold
/// after every mark: `equity == cash + position_quantity * mark_price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    /// Signed quantity: positive long, negative short, zero flat.
    pub position_quantity: f64,
    pub position_avg_price: f64,
    pub equity: f64,
}

impl PortfolioState {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: starting_cash,
            position_quantity: 0.0,
            position_avg_price: 0.0,
            equity: starting_cash,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position_quantity == 0.0
    }

    /// Market value of the position at `price`.
    pub fn market_value(&self, price: f64) -> f64 {
        self.position_quantity * price
    }

    /// Equity at `price` without changing state.
    pub fn equity_at(&self, price: f64) -> f64 {
        self.cash + self.market_value(price)
    }

    /// Mark to market at `price`, updating `equity`.
    pub fn mark(&mut self, price: f64) -> f64 {
        self.equity = self.equity_at(price);
        self.equity
    }
}
