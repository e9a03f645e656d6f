//! Executed trades and chart markers.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::order::OrderSide;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub time: NaiveDateTime,
    pub ticker: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeMarker {
    pub time: NaiveDateTime,
    pub price: f64,
    pub side: OrderSide,
}

impl From<&Trade> for TradeMarker {
    fn from(trade: &Trade) -> Self {
        TradeMarker {
            time: trade.time,
            price: trade.price,
            side: trade.side,
        }
    }
}

pub fn markers_for(trades: &[Trade], ticker: &str) -> Vec<TradeMarker> {
    trades
        .iter()
        .filter(|t| t.ticker == ticker)
        .map(TradeMarker::from)
        .collect()
}
