//! Market data ingestion and lookups over the bar store.

use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;
use tracing::{debug, error, info};

use super::bar::Bar;
use super::error::DashtraderError;
use crate::ports::data_port::DataPort;
use crate::ports::market_data_port::MarketDataPort;

/// Parameters for a historical fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    /// Lookback used when `start` is not given.
    pub days: i64,
    /// Resume from the oldest of the per-ticker latest stored bars.
    pub use_most_recent: bool,
}

pub struct DataHandler<'a> {
    tickers: Vec<String>,
    store: &'a dyn DataPort,
}

impl<'a> DataHandler<'a> {
    pub fn new(tickers: Vec<String>, store: &'a dyn DataPort) -> Self {
        Self { tickers, store }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Pulls bars from `source` one day at a time and stores them.
    /// Returns the number of newly stored bars.
    pub fn fetch_data(
        &self,
        source: &dyn MarketDataPort,
        request: &FetchRequest,
        now: NaiveDateTime,
    ) -> Result<usize, DashtraderError> {
        let end = request.end.unwrap_or(now);
        let mut start = request
            .start
            .unwrap_or_else(|| end - Duration::days(request.days.max(1)));

        if request.use_most_recent {
            if let Some(resume) = self.oldest_latest_timestamp()? {
                start = resume;
            }
        }

        let mut stored = 0usize;
        let mut window_start = start;
        while window_start <= end {
            let window_end = window_start + Duration::days(1);
            info!("fetching data for tickers from {} to {}", window_start, window_end);

            match source.fetch_bars(&self.tickers, window_start, window_end) {
                Ok(bars) if bars.is_empty() => info!("no data received"),
                Ok(bars) => {
                    let n = self.save_market_data(&bars)?;
                    info!("data saved for tickers: {} new bars", n);
                    stored += n;
                }
                Err(e) => error!("error fetching market data: {}", e),
            }

            window_start = window_end;
        }
        Ok(stored)
    }

    /// Oldest of each ticker's most recent stored bar, so a resumed fetch
    /// does not leave gaps for lagging tickers.
    fn oldest_latest_timestamp(&self) -> Result<Option<NaiveDateTime>, DashtraderError> {
        let mut oldest: Option<NaiveDateTime> = None;
        for ticker in &self.tickers {
            if let Some(bar) = self.store.latest_bar(ticker)? {
                oldest = Some(match oldest {
                    Some(ts) if ts <= bar.timestamp => ts,
                    _ => bar.timestamp,
                });
            }
        }
        Ok(oldest)
    }

    pub fn save_market_data(&self, bars: &[Bar]) -> Result<usize, DashtraderError> {
        let relevant: Vec<Bar> = bars
            .iter()
            .filter(|b| self.is_subscribed(&b.ticker))
            .cloned()
            .collect();
        for bar in &relevant {
            debug!(
                "candle values for {}: ({}, {}, {}, {}, {}, {}, {})",
                bar.ticker, bar.timestamp, bar.open, bar.high, bar.low, bar.close, bar.volume, bar.vwap
            );
        }
        self.store.save_bars(&relevant)
    }

    /// Latest close per ticker; tickers without data are absent.
    pub fn most_recent_prices(&self) -> Result<HashMap<String, f64>, DashtraderError> {
        let mut prices = HashMap::new();
        for ticker in &self.tickers {
            if let Some(bar) = self.store.latest_bar(ticker)? {
                prices.insert(ticker.clone(), bar.close);
            }
        }
        Ok(prices)
    }

    /// Every stored bar per ticker, oldest first.
    pub fn backtest_data(&self) -> Result<HashMap<String, Vec<Bar>>, DashtraderError> {
        let mut data = HashMap::new();
        for ticker in &self.tickers {
            data.insert(ticker.clone(), self.store.fetch_bars(ticker, None, None)?);
        }
        Ok(data)
    }

    pub fn historical(
        &self,
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DashtraderError> {
        self.store.fetch_bars(ticker, Some(start), Some(end))
    }

    /// Stores streamed bars, dropping tickers that are not subscribed.
    pub fn handle_stream_bars(&self, bars: &[Bar]) -> Result<usize, DashtraderError> {
        for bar in bars.iter().filter(|b| self.is_subscribed(&b.ticker)) {
            info!("received data for {}: close {}", bar.ticker, bar.close);
        }
        self.save_market_data(bars)
    }

    fn is_subscribed(&self, ticker: &str) -> bool {
        self.tickers.iter().any(|t| t == ticker)
    }
}

/// Splits a comma separated ticker list, upper-casing and dropping blanks.
pub fn parse_tickers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
