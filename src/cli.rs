//! CLI definition and dispatch.

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::sqlite_adapter::SqliteAdapter;
use crate::domain::data_handler::{parse_tickers, DataHandler, FetchRequest};
use crate::domain::error::DashtraderError;
use crate::domain::position_manager::{PositionManager, DEFAULT_EQUITY_POINTS};
use crate::domain::sizing::{SizingParams, DEFAULT_STARTING_BALANCE};
use crate::ports::config_port::ConfigPort;
use crate::ports::trade_log_port::TradeLog;

#[derive(Parser, Debug)]
#[command(name = "dashtrader", about = "Trading dashboard and market data tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web dashboard and position monitor
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Import bars from the CSV source into the database
    Import {
        #[arg(short, long)]
        config: PathBuf,
        /// Lookback in days when --start is not given
        #[arg(long, default_value_t = 1)]
        days: i64,
        /// Resume from the most recent stored bar
        #[arg(long)]
        most_recent: bool,
        /// First day to import (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Last day to import (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },
    /// Print the latest stored close for each ticker
    Prices {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the recorded trade history
    Trades {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Serve { config } => run_serve(&config),
        Command::Import {
            config,
            days,
            most_recent,
            start,
            end,
        } => run_import(&config, days, most_recent, start.as_deref(), end.as_deref()),
        Command::Prices { config } => run_prices(&config),
        Command::Trades { config } => run_trades(&config),
    }
}

fn fail(err: &DashtraderError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Installs the global subscriber. `RUST_LOG` wins over `[log] level`.
pub fn init_logging(config: &dyn ConfigPort) {
    let level = config.get_string_or("log", "level", "info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Tickers from `[data] tickers`; an empty list is a config error.
pub fn resolve_tickers(config: &dyn ConfigPort) -> Result<Vec<String>, DashtraderError> {
    let tickers = config
        .get_string("data", "tickers")
        .map(|v| parse_tickers(&v))
        .unwrap_or_default();
    if tickers.is_empty() {
        return Err(DashtraderError::ConfigMissing {
            section: "data".into(),
            key: "tickers".into(),
        });
    }
    Ok(tickers)
}

pub fn parse_day(value: &str, key: &str) -> Result<NaiveDate, DashtraderError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        DashtraderError::ConfigInvalid {
            section: "import".into(),
            key: key.into(),
            reason: e.to_string(),
        }
    })
}

/// Fetch window for `import`; an end day covers the whole of that day.
pub fn build_fetch_request(
    days: i64,
    most_recent: bool,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<FetchRequest, DashtraderError> {
    let start = start
        .map(|s| parse_day(s, "start"))
        .transpose()?
        .map(|d| d.and_time(chrono::NaiveTime::MIN));
    let end = end
        .map(|s| parse_day(s, "end"))
        .transpose()?
        .and_then(|d| d.and_hms_opt(23, 59, 59));
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(DashtraderError::ConfigInvalid {
                section: "import".into(),
                key: "start".into(),
                reason: "start must not be after end".into(),
            });
        }
    }
    Ok(FetchRequest {
        start,
        end,
        days,
        use_most_recent: most_recent,
    })
}

/// Simulated manager seeded from `[account]` and `[sizing]`, with the
/// fills in `log` replayed on top of the starting balance.
pub fn build_manager(
    config: &dyn ConfigPort,
    log: Arc<dyn TradeLog + Send + Sync>,
) -> Result<PositionManager, DashtraderError> {
    let params = SizingParams::from_config(config)?;
    let balance = config.get_double("account", "starting_balance", DEFAULT_STARTING_BALANCE);
    if !(balance > 0.0) {
        return Err(DashtraderError::ConfigInvalid {
            section: "account".into(),
            key: "starting_balance".into(),
            reason: "must be positive".into(),
        });
    }
    let equity_points = config.get_int("monitor", "equity_points", DEFAULT_EQUITY_POINTS as i64);
    PositionManager::simulated(balance, params)
        .with_equity_capacity(equity_points.max(1) as usize)
        .with_trade_log(log)
}

fn open_store(config: &dyn ConfigPort) -> Result<SqliteAdapter, DashtraderError> {
    let store = SqliteAdapter::from_config(config)?;
    store.initialize_schema()?;
    Ok(store)
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn run_import(
    config_path: &PathBuf,
    days: i64,
    most_recent: bool,
    start: Option<&str>,
    end: Option<&str>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&config);

    let result = (|| -> Result<usize, DashtraderError> {
        let tickers = resolve_tickers(&config)?;
        let request = build_fetch_request(days, most_recent, start, end)?;
        let source = CsvAdapter::from_config(&config)?;
        let store = open_store(&config)?;
        let handler = DataHandler::new(tickers, &store);
        handler.fetch_data(&source, &request, now())
    })();

    match result {
        Ok(stored) => {
            eprintln!("Imported {stored} new bars");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_prices(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<Vec<(String, Option<f64>)>, DashtraderError> {
        let tickers = resolve_tickers(&config)?;
        let store = open_store(&config)?;
        let prices = DataHandler::new(tickers.clone(), &store).most_recent_prices()?;
        Ok(tickers
            .into_iter()
            .map(|t| {
                let price = prices.get(&t).copied();
                (t, price)
            })
            .collect())
    })();

    match result {
        Ok(rows) => {
            for (ticker, price) in rows {
                match price {
                    Some(p) => println!("{ticker}: {p:.2}"),
                    None => eprintln!("{ticker}: no data found"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_trades(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let trades = match open_store(&config).and_then(|store| store.list_trades()) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };

    if trades.is_empty() {
        eprintln!("No trades recorded");
    }
    for t in &trades {
        println!(
            "{}  {:<6} {:<4} {:>10.2} x {}",
            t.time.format("%Y-%m-%d %H:%M:%S"),
            t.ticker,
            t.side,
            t.price,
            t.quantity
        );
    }
    ExitCode::SUCCESS
}

fn run_serve(config_path: &PathBuf) -> ExitCode {
    #[cfg(feature = "web")]
    {
        use crate::adapters::web::{build_router, AppState};
        use crate::monitor::{Monitor, DEFAULT_INTERVAL};
        use crate::ports::data_port::DataPort;
        use std::net::SocketAddr;
        use std::time::Duration;
        use tokio::sync::{Notify, RwLock};

        eprintln!("Loading config from {}", config_path.display());
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(code) => return code,
        };
        init_logging(&config);

        let listen = config.get_string_or("web", "listen", "127.0.0.1:8000");
        let addr: SocketAddr = match listen.parse() {
            Ok(a) => a,
            Err(e) => {
                return fail(&DashtraderError::ConfigInvalid {
                    section: "web".into(),
                    key: "listen".into(),
                    reason: format!("{e}"),
                });
            }
        };

        let setup = (|| -> Result<_, DashtraderError> {
            let tickers = resolve_tickers(&config)?;
            let store = Arc::new(open_store(&config)?);
            let manager = build_manager(&config, store.clone())?;
            Ok((tickers, store, manager))
        })();
        let (tickers, store, manager) = match setup {
            Ok(parts) => parts,
            Err(e) => return fail(&e),
        };

        let manager = Arc::new(RwLock::new(manager));
        let store: Arc<dyn DataPort + Send + Sync> = store;
        let interval_secs =
            config.get_int("monitor", "interval_secs", DEFAULT_INTERVAL.as_secs() as i64);
        let monitor = Monitor {
            manager: Arc::clone(&manager),
            store: Arc::clone(&store),
            tickers,
            interval: Duration::from_secs(interval_secs.max(1) as u64),
        };
        let state = AppState::new(manager, store).with_config(&config);
        let router = build_router(state);

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => return fail(&e.into()),
        };

        let served: std::io::Result<()> = runtime.block_on(async move {
            let shutdown = Arc::new(Notify::new());
            let monitor_task = tokio::spawn(monitor.run(Arc::clone(&shutdown)));

            let signal = Arc::clone(&shutdown);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("ctrl-c received, shutting down");
                        signal.notify_waiters();
                    }
                    Err(e) => tracing::error!("unable to listen for ctrl-c: {}", e),
                }
            });

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    shutdown.notify_waiters();
                    return Err(e);
                }
            };
            eprintln!("Starting web server on {addr}");

            let stop = Arc::clone(&shutdown);
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.notified().await })
                .await;

            if let Err(e) = monitor_task.await {
                tracing::warn!("monitor task ended abnormally: {}", e);
            }
            result
        });

        match served {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(&e.into()),
        }
    }

    #[cfg(not(feature = "web"))]
    {
        let _ = config_path;
        eprintln!("error: web feature is required for serve");
        ExitCode::from(1)
    }
}
