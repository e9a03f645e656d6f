//! Brokerage account access for live trading.

use crate::domain::account::AccountInfo;
use crate::domain::error::DashtraderError;
use crate::domain::order::OrderSide;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub ticker: String,
    /// Signed; negative for shorts.
    pub quantity: f64,
    /// Shares not held by open orders.
    pub qty_available: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub order_id: String,
    pub ticker: String,
    pub quantity: f64,
    pub side: OrderSide,
    pub status: String,
}

impl BrokerOrder {
    pub fn is_accepted(&self) -> bool {
        self.status.eq_ignore_ascii_case("accepted")
    }

    /// Still waiting on the exchange.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "new" | "accepted" | "pending"
        )
    }
}

pub trait BrokerPort {
    fn account(&self) -> Result<AccountInfo, DashtraderError>;
    fn positions(&self) -> Result<Vec<BrokerPosition>, DashtraderError>;
    fn orders(&self) -> Result<Vec<BrokerOrder>, DashtraderError>;
    fn close_position(&self, ticker: &str) -> Result<BrokerOrder, DashtraderError>;
}
