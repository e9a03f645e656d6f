//! SQLite bar store and trade log.

use crate::domain::bar::Bar;
use crate::domain::error::DashtraderError;
use crate::domain::order::OrderSide;
use crate::domain::trade::Trade;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::trade_log_port::TradeLog;
use chrono::NaiveDateTime;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn query_err(e: rusqlite::Error) -> DashtraderError {
    DashtraderError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(value: &str) -> Result<NaiveDateTime, DashtraderError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|e: chrono::ParseError| {
        DashtraderError::Database {
            reason: format!("bad timestamp '{value}': {e}"),
        }
    })
}

/// Column order shared by every bar query.
const BAR_COLUMNS: &str = "ticker, timestamp, open, high, low, close, volume, vwap";

type RawBar = (String, String, f64, f64, f64, f64, f64, f64);

fn raw_bar(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBar> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_bar(raw: RawBar) -> Result<Bar, DashtraderError> {
    let (ticker, ts, open, high, low, close, volume, vwap) = raw;
    Ok(Bar {
        ticker,
        timestamp: parse_ts(&ts)?,
        open,
        high,
        low,
        close,
        volume,
        vwap,
    })
}

impl SqliteAdapter {
    /// Opens the database named by `[data] sqlite_path`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, DashtraderError> {
        let db_path =
            config
                .get_string("data", "sqlite_path")
                .ok_or_else(|| DashtraderError::ConfigMissing {
                    section: "data".into(),
                    key: "sqlite_path".into(),
                })?;

        let pool_size = config.get_int("data", "pool_size", 4);
        if pool_size < 1 {
            return Err(DashtraderError::ConfigInvalid {
                section: "data".into(),
                key: "pool_size".into(),
                reason: "must be at least 1".into(),
            });
        }

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size as u32)
            .build(manager)
            .map_err(|e: r2d2::Error| DashtraderError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, DashtraderError> {
        // a single connection keeps every caller on the same in-memory database
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| DashtraderError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, DashtraderError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| DashtraderError::Database {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), DashtraderError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ticker_data (
                timestamp TEXT NOT NULL,
                ticker TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                vwap REAL NOT NULL,
                PRIMARY KEY (ticker, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_ticker_data_timestamp ON ticker_data(timestamp);
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL
            );",
        )
        .map_err(query_err)?;
        Ok(())
    }
}

impl DataPort for SqliteAdapter {
    fn save_bars(&self, bars: &[Bar]) -> Result<usize, DashtraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        let mut inserted = 0usize;
        for bar in bars {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO ticker_data
                     (timestamp, ticker, open, high, low, close, volume, vwap)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        format_ts(bar.timestamp),
                        bar.ticker,
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume,
                        bar.vwap
                    ],
                )
                .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(inserted)
    }

    fn latest_bar(&self, ticker: &str) -> Result<Option<Bar>, DashtraderError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {BAR_COLUMNS} FROM ticker_data
             WHERE ticker = ?1 ORDER BY timestamp DESC LIMIT 1"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let mut rows = stmt.query_map(params![ticker], raw_bar).map_err(query_err)?;
        match rows.next() {
            Some(row) => Ok(Some(into_bar(row.map_err(query_err)?)?)),
            None => Ok(None),
        }
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, DashtraderError> {
        let conn = self.conn()?;
        // fixed-width text timestamps sort chronologically
        let start_str = start.map(format_ts).unwrap_or_default();
        let end_str = end
            .map(format_ts)
            .unwrap_or_else(|| "9999-12-31 23:59:59".to_string());

        let query = format!(
            "SELECT {BAR_COLUMNS} FROM ticker_data
             WHERE ticker = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(params![ticker, start_str, end_str], raw_bar)
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(into_bar(row.map_err(query_err)?)?);
        }
        Ok(bars)
    }

    fn get_data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, DashtraderError> {
        let conn = self.conn()?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp), COUNT(*) FROM ticker_data WHERE ticker = ?1",
                params![ticker],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min), Some(max), count) if count > 0 => {
                Ok(Some((parse_ts(&min)?, parse_ts(&max)?, count as usize)))
            }
            _ => Ok(None),
        }
    }
}

impl TradeLog for SqliteAdapter {
    fn record_trade(&self, trade: &Trade) -> Result<(), DashtraderError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trades (time, ticker, side, price, quantity) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_ts(trade.time),
                trade.ticker,
                trade.side.as_str(),
                trade.price,
                trade.quantity
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn list_trades(&self) -> Result<Vec<Trade>, DashtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT time, ticker, side, price, quantity FROM trades ORDER BY time ASC, id ASC")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })
            .map_err(query_err)?;

        let mut trades = Vec::new();
        for row in rows {
            let (time, ticker, side, price, quantity) = row.map_err(query_err)?;
            let side = OrderSide::parse(&side).ok_or_else(|| DashtraderError::Database {
                reason: format!("unknown trade side '{side}'"),
            })?;
            trades.push(Trade {
                time: parse_ts(&time)?,
                ticker,
                side,
                price,
                quantity,
            });
        }
        Ok(trades)
    }
}
