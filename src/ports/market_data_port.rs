//! Upstream market data source.

use crate::domain::bar::Bar;
use crate::domain::error::DashtraderError;
use chrono::NaiveDateTime;

pub trait MarketDataPort {
    /// Bars for every requested ticker with `start <= timestamp < end`.
    fn fetch_bars(
        &self,
        tickers: &[String],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DashtraderError>;
}
