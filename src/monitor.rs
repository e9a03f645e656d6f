//! Background task that marks positions to market on a fixed period.

use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::domain::data_handler::DataHandler;
use crate::domain::error::DashtraderError;
use crate::domain::position_manager::PositionManager;
use crate::ports::data_port::DataPort;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

pub struct Monitor {
    pub manager: Arc<RwLock<PositionManager>>,
    pub store: Arc<dyn DataPort + Send + Sync>,
    pub tickers: Vec<String>,
    pub interval: Duration,
}

/// Outcome of one monitor pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub equity: f64,
    pub priced: usize,
    pub closed: Vec<String>,
}

impl Monitor {
    /// Reads the latest stored prices, then revalues and sweeps exits under
    /// the write lock.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<TickReport, DashtraderError> {
        let prices = DataHandler::new(self.tickers.clone(), &*self.store).most_recent_prices()?;
        debug!("monitor loaded {} prices", prices.len());

        let mut manager = self.manager.write().await;
        manager.refresh_from_broker(now)?;
        manager.refresh_pending_orders()?;
        let equity = manager.mark_to_market(now, &prices)?;
        let closed = manager.check_positions(&prices, now)?;

        Ok(TickReport {
            equity,
            priced: prices.len(),
            closed,
        })
    }

    /// Ticks until `shutdown` is notified. Failed ticks are logged and retried
    /// on the next period.
    pub async fn run(self, shutdown: Arc<Notify>) {
        info!("[Monitor] started, interval {:?}", self.interval);
        let stop = shutdown.notified();
        tokio::pin!(stop);
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = chrono::Utc::now().naive_utc();
                    match self.tick(now).await {
                        Ok(report) if !report.closed.is_empty() => {
                            info!("[Monitor] closed {}", report.closed.join(", "));
                        }
                        Ok(_) => {}
                        Err(e) => warn!("[Monitor] tick failed: {}", e),
                    }
                }
                _ = &mut stop => {
                    info!("[Monitor] shutdown signal received");
                    break;
                }
            }
        }
        info!("[Monitor] stopped");
    }
}
