//! Persistent trade history.

use crate::domain::error::DashtraderError;
use crate::domain::trade::Trade;

pub trait TradeLog {
    fn record_trade(&self, trade: &Trade) -> Result<(), DashtraderError>;

    /// All recorded trades, oldest first.
    fn list_trades(&self) -> Result<Vec<Trade>, DashtraderError>;
}
