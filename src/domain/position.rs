//! Open position tracking and P&L.

use chrono::NaiveDateTime;

use super::order::OrderSide;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    /// Signed share count; negative for shorts.
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub side: OrderSide,
    pub entry_time: NaiveDateTime,
    pub is_open: bool,
}

impl Position {
    pub fn open(
        ticker: impl Into<String>,
        quantity: f64,
        entry_price: f64,
        entry_time: NaiveDateTime,
    ) -> Self {
        Position {
            ticker: ticker.into(),
            quantity,
            entry_price,
            current_price: entry_price,
            side: OrderSide::from_quantity(quantity),
            entry_time,
            is_open: true,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn update_pl(&mut self, price: f64) {
        self.current_price = price;
    }

    /// Signed value at the current price.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn pl(&self) -> f64 {
        self.quantity * (self.current_price - self.entry_price)
    }

    /// P&L as a fraction of cost basis.
    pub fn pl_pct(&self) -> f64 {
        let basis = self.quantity.abs() * self.entry_price;
        if basis == 0.0 {
            return 0.0;
        }
        self.pl() / basis
    }

    /// Fraction of account equity tied up in this position.
    pub fn exposure(&self, equity: f64) -> f64 {
        if equity <= 0.0 {
            return 0.0;
        }
        self.market_value().abs() / equity
    }

    pub fn age_days(&self, now: NaiveDateTime) -> i64 {
        (now - self.entry_time).num_days()
    }
}
