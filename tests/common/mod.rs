#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
pub use dashtrader::domain::bar::Bar;
use dashtrader::domain::error::DashtraderError;
use dashtrader::domain::order::{Order, OrderSide};
use dashtrader::domain::position_manager::PositionManager;
use dashtrader::domain::sizing::SizingParams;
use dashtrader::ports::data_port::DataPort;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory bar store with optional per-ticker failures.
pub struct MockDataPort {
    pub data: Mutex<HashMap<String, Vec<Bar>>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(self, ticker: &str, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        self.data.lock().unwrap().insert(ticker.to_string(), bars);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }

    fn check(&self, ticker: &str) -> Result<(), DashtraderError> {
        match self.errors.get(ticker) {
            Some(reason) => Err(DashtraderError::Database {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn save_bars(&self, bars: &[Bar]) -> Result<usize, DashtraderError> {
        let mut data = self.data.lock().unwrap();
        let mut inserted = 0;
        for bar in bars {
            let series = data.entry(bar.ticker.clone()).or_default();
            if series.iter().all(|b| b.timestamp != bar.timestamp) {
                series.push(bar.clone());
                inserted += 1;
            }
            series.sort_by_key(|b| b.timestamp);
        }
        Ok(inserted)
    }

    fn latest_bar(&self, ticker: &str) -> Result<Option<Bar>, DashtraderError> {
        self.check(ticker)?;
        let data = self.data.lock().unwrap();
        Ok(data.get(ticker).and_then(|bars| bars.last().cloned()))
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, DashtraderError> {
        self.check(ticker)?;
        let data = self.data.lock().unwrap();
        Ok(data
            .get(ticker)
            .map(|bars| {
                bars.iter()
                    .filter(|b| start.is_none_or(|s| b.timestamp >= s))
                    .filter(|b| end.is_none_or(|e| b.timestamp <= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, DashtraderError> {
        self.check(ticker)?;
        let data = self.data.lock().unwrap();
        match data.get(ticker) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.first().unwrap().timestamp;
                let max = bars.last().unwrap().timestamp;
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

pub fn make_bar(ticker: &str, timestamp: NaiveDateTime, close: f64) -> Bar {
    Bar {
        ticker: ticker.to_string(),
        timestamp,
        open: close - 1.0,
        high: close + 1.0,
        low: close - 2.0,
        close,
        volume: 1000.0,
        vwap: close - 0.5,
    }
}

/// One bar per day starting at `start`, rising by 1 each day.
pub fn generate_bars(ticker: &str, start: NaiveDateTime, count: usize, start_price: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| make_bar(ticker, start + chrono::Duration::days(i as i64), start_price + i as f64))
        .collect()
}

/// Simulated manager holding the given (ticker, quantity, price) buys.
pub fn manager_with_buys(buys: &[(&str, f64, f64)], when: NaiveDateTime) -> PositionManager {
    let mut manager = PositionManager::simulated(30_000.0, SizingParams::default());
    for (ticker, qty, price) in buys {
        manager
            .apply_order(&Order::new(*ticker, *qty, *price, OrderSide::Buy), when)
            .unwrap();
    }
    manager
}
