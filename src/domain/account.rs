//! Account snapshot and equity history.

use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub equity: f64,
    pub buying_power: f64,
    pub initial_margin: f64,
    pub margin_multiplier: f64,
    pub daytrading_buying_power: f64,
}

impl AccountInfo {
    /// Cash-only account with no margin.
    pub fn cash(equity: f64, cash: f64) -> Self {
        AccountInfo {
            equity,
            buying_power: cash,
            initial_margin: 0.0,
            margin_multiplier: 1.0,
            daytrading_buying_power: cash,
        }
    }

    /// Balance shown on the dashboard.
    pub fn balance(&self) -> f64 {
        self.buying_power
    }

    pub fn margin(&self) -> f64 {
        self.initial_margin
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}
