//! Web server adapter.
//!
//! Axum server with an HTMX-friendly frontend showing the account,
//! open positions, executed trades and charts.

mod error;
mod handlers;
mod templates;

pub use error::WebError;
pub use handlers::*;
pub use templates::*;

use axum::{Router, routing::get};
use chrono::Datelike;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::domain::position_manager::PositionManager;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

pub const DEFAULT_CHART_DAYS: i64 = 290;

pub struct AppState {
    pub manager: Arc<RwLock<PositionManager>>,
    pub store: Arc<dyn DataPort + Send + Sync>,
    pub static_dir: PathBuf,
    pub chart_days: i64,
    /// Period between trade snapshots on the websocket.
    pub ws_interval: Duration,
}

impl AppState {
    pub fn new(
        manager: Arc<RwLock<PositionManager>>,
        store: Arc<dyn DataPort + Send + Sync>,
    ) -> Self {
        Self {
            manager,
            store,
            static_dir: PathBuf::from("static"),
            chart_days: DEFAULT_CHART_DAYS,
            ws_interval: Duration::from_secs(1),
        }
    }

    /// Applies `[web] static_dir` and `[data] chart_days`.
    pub fn with_config(mut self, config: &dyn ConfigPort) -> Self {
        if let Some(dir) = config.get_string("web", "static_dir") {
            self.static_dir = PathBuf::from(dir);
        }
        self.chart_days = config
            .get_int("data", "chart_days", DEFAULT_CHART_DAYS)
            .max(1);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);
    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/chart/{ticker}", get(handlers::chart))
        .route("/ws/trades", get(handlers::trades_ws))
        .nest_service("/static", static_files)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn is_htmx_request(headers: &axum::http::HeaderMap) -> bool {
    headers.get("HX-Request").is_some()
}

fn current_year() -> i32 {
    chrono::Utc::now().year()
}
