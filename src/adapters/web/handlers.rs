//! HTTP request handlers for web adapter.

use askama::Template;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, Uri},
    response::{Html, IntoResponse, Response},
};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::chart::{candlestick_svg, equity_curve_svg};

use super::templates::{
    AccountView, BasePage, ChartTemplate, DashboardTemplate, PositionRow, TradeRow,
};
use super::{AppState, WebError, current_year, is_htmx_request};

/// Renders `template` alone for HTMX requests, otherwise inside the base page.
fn render_page<T: Template>(
    headers: &HeaderMap,
    title: &str,
    template: &T,
) -> Result<Response, WebError> {
    let content = template.render()?;
    if is_htmx_request(headers) {
        return Ok(Html(content).into_response());
    }
    let page = BasePage {
        title,
        content: &content,
        year: current_year(),
    };
    Ok(Html(page.render()?).into_response())
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let template = {
        let manager = state.manager.read().await;
        let account = manager.account_info()?;
        DashboardTemplate {
            account: AccountView::from(&account),
            positions: manager.positions().map(PositionRow::from).collect(),
            trades: manager.trades().iter().map(TradeRow::from).collect(),
            equity_chart: equity_curve_svg(manager.equity_curve()),
        }
    };

    render_page(&headers, "Dashboard", &template)
}

/// Candlestick chart of the last `chart_days` of stored bars for one ticker.
pub async fn chart(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let ticker = ticker.trim().to_uppercase();
    let Some((_, last, _)) = state.store.get_data_range(&ticker)? else {
        return Err(WebError::not_found(format!("no price data for {ticker}")));
    };

    // window ends at the newest stored bar so historical data still charts
    let start = last - Duration::days(state.chart_days);
    let bars = state.store.fetch_bars(&ticker, Some(start), Some(last))?;
    let markers = state.manager.read().await.trade_markers(&ticker);
    debug!("chart for {}: {} bars, {} markers", ticker, bars.len(), markers.len());

    let template = ChartTemplate {
        ticker: &ticker,
        bar_count: bars.len(),
        trade_count: markers.len(),
        chart: candlestick_svg(&ticker, &bars, &markers),
    };
    render_page(&headers, &ticker, &template)
}

pub async fn trades_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_trades(socket, state))
}

/// Pushes the full trade list as JSON once per tick until the client leaves.
async fn stream_trades(mut socket: WebSocket, state: Arc<AppState>) {
    info!("trade stream client connected");
    let mut interval = tokio::time::interval(state.ws_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let payload = {
                    let manager = state.manager.read().await;
                    serde_json::to_string(manager.trades())
                };
                let payload = match payload {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("failed to serialise trades: {}", e);
                        break;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    info!("trade stream client disconnected");
}

pub async fn not_found(uri: Uri) -> WebError {
    WebError::not_found(format!("no route for {}", uri.path()))
}
