//! Order side and order records.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    /// Side implied by a signed quantity: positive is long, negative short.
    pub fn from_quantity(quantity: f64) -> Self {
        if quantity < 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fill request against the simulated account.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub ticker: String,
    pub quantity: f64,
    pub price: f64,
    pub side: OrderSide,
}

impl Order {
    pub fn new(ticker: impl Into<String>, quantity: f64, price: f64, side: OrderSide) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            price,
            side,
        }
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Order acknowledged by the broker but not yet filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: String,
    pub ticker: String,
    pub shares: f64,
    pub side: OrderSide,
}
