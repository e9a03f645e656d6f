//! Trading signals consumed by the position manager.

use chrono::NaiveDateTime;

use super::order::OrderSide;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signal {
    pub strategy: String,
    pub ticker: String,
    pub price: f64,
    pub action: Option<OrderSide>,
    /// Technical score in 0..=1; higher is more bullish.
    pub score: Option<f64>,
    /// Recent price momentum as a fraction.
    pub momentum: Option<f64>,
    pub timestamp: Option<NaiveDateTime>,
}

impl Signal {
    pub fn new(strategy: impl Into<String>, ticker: impl Into<String>, price: f64) -> Self {
        Signal {
            strategy: strategy.into(),
            ticker: ticker.into(),
            price,
            ..Default::default()
        }
    }

    /// Price-only signal used by the periodic stop-loss sweep.
    pub fn stop_loss(ticker: impl Into<String>, price: f64) -> Self {
        Self::new("stop-loss", ticker, price)
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = Some(momentum);
        self
    }

    pub fn with_action(mut self, action: OrderSide) -> Self {
        self.action = Some(action);
        self
    }
}
