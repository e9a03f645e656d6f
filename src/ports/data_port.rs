//! Bar storage port trait.

use crate::domain::bar::Bar;
use crate::domain::error::DashtraderError;
use chrono::NaiveDateTime;

pub trait DataPort {
    /// Stores bars, ignoring any whose (ticker, timestamp) already exists.
    /// Returns the number of rows inserted.
    fn save_bars(&self, bars: &[Bar]) -> Result<usize, DashtraderError>;

    fn latest_bar(&self, ticker: &str) -> Result<Option<Bar>, DashtraderError>;

    /// Bars in ascending timestamp order, bounded inclusively when given.
    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, DashtraderError>;

    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, DashtraderError>;
}
