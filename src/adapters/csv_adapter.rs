//! CSV market data source: one `<TICKER>.csv` file per ticker.
//!
//! Each file is parsed once per adapter; later windows are served from the
//! parsed copy.

use crate::domain::bar::Bar;
use crate::domain::error::DashtraderError;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
    parsed: Mutex<HashMap<String, Arc<Vec<Bar>>>>,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            parsed: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `[data] csv_dir` as the base directory.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, DashtraderError> {
        let dir = config
            .get_string("data", "csv_dir")
            .ok_or_else(|| DashtraderError::ConfigMissing {
                section: "data".into(),
                key: "csv_dir".into(),
            })?;
        Ok(Self::new(PathBuf::from(dir)))
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{ticker}.csv"))
    }

    /// Bars in `[start, end)` for `ticker`, ascending.
    fn read_ticker(
        &self,
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DashtraderError> {
        let all = self.load_ticker(ticker)?;
        let from = all.partition_point(|b| b.timestamp < start);
        let to = all.partition_point(|b| b.timestamp < end);
        Ok(all[from..to.max(from)].to_vec())
    }

    fn load_ticker(&self, ticker: &str) -> Result<Arc<Vec<Bar>>, DashtraderError> {
        let mut parsed = self.parsed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bars) = parsed.get(ticker) {
            return Ok(Arc::clone(bars));
        }
        let bars = Arc::new(self.parse_file(ticker)?);
        parsed.insert(ticker.to_string(), Arc::clone(&bars));
        Ok(bars)
    }

    fn parse_file(&self, ticker: &str) -> Result<Vec<Bar>, DashtraderError> {
        let path = self.csv_path(ticker);
        if !path.exists() {
            debug!("no csv file for {} at {}", ticker, path.display());
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| DashtraderError::MarketData {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| DashtraderError::MarketData {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;

            bars.push(Bar {
                ticker: ticker.to_string(),
                timestamp: parse_timestamp(field(&record, 0, "timestamp")?)?,
                open: number(&record, 1, "open")?,
                high: number(&record, 2, "high")?,
                low: number(&record, 3, "low")?,
                close: number(&record, 4, "close")?,
                volume: number(&record, 5, "volume")?,
                vwap: number(&record, 6, "vwap")?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        debug!("parsed {} bars for {} from {}", bars.len(), ticker, path.display());
        Ok(bars)
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
) -> Result<&'r str, DashtraderError> {
    record.get(index).ok_or_else(|| DashtraderError::MarketData {
        reason: format!("missing {name} column"),
    })
}

fn number(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, DashtraderError> {
    field(record, index, name)?
        .trim()
        .parse()
        .map_err(|e| DashtraderError::MarketData {
            reason: format!("invalid {name} value: {e}"),
        })
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare date (midnight).
fn parse_timestamp(value: &str) -> Result<NaiveDateTime, DashtraderError> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| DashtraderError::MarketData {
            reason: format!("invalid timestamp '{value}': {e}"),
        })
}

impl MarketDataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        tickers: &[String],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DashtraderError> {
        let mut bars = Vec::new();
        for ticker in tickers {
            bars.extend(self.read_ticker(ticker, start, end)?);
        }
        Ok(bars)
    }
}
