//! HTML templates using Askama.
//!
//! Every numeric value is formatted before it reaches a template, so the
//! templates only print strings.

use askama::Template;

use crate::domain::account::AccountInfo;
use crate::domain::position::Position;
use crate::domain::trade::Trade;

fn money(value: f64) -> String {
    format!("{value:.2}")
}

pub struct AccountView {
    pub balance: String,
    pub equity: String,
    pub margin: String,
}

impl From<&AccountInfo> for AccountView {
    fn from(info: &AccountInfo) -> Self {
        AccountView {
            balance: money(info.balance()),
            equity: money(info.equity),
            margin: money(info.margin()),
        }
    }
}

pub struct PositionRow {
    pub ticker: String,
    pub quantity: String,
    pub entry_price: String,
    pub current_price: String,
    pub pnl: String,
}

impl From<&Position> for PositionRow {
    fn from(p: &Position) -> Self {
        PositionRow {
            ticker: p.ticker.clone(),
            quantity: p.quantity.to_string(),
            entry_price: money(p.entry_price),
            current_price: money(p.current_price),
            pnl: money(p.pl()),
        }
    }
}

pub struct TradeRow {
    pub time: String,
    pub ticker: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        TradeRow {
            time: t.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            ticker: t.ticker.clone(),
            side: t.side.to_string(),
            price: money(t.price),
            quantity: t.quantity.to_string(),
        }
    }
}

/// Full HTML document around a rendered content fragment.
#[derive(Template)]
#[template(path = "base.html")]
pub struct BasePage<'a> {
    pub title: &'a str,
    /// Already rendered markup.
    pub content: &'a str,
    pub year: i32,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub account: AccountView,
    pub positions: Vec<PositionRow>,
    pub trades: Vec<TradeRow>,
    /// Trusted SVG markup, inserted without escaping.
    pub equity_chart: String,
}

#[derive(Template)]
#[template(path = "chart.html")]
pub struct ChartTemplate<'a> {
    pub ticker: &'a str,
    pub bar_count: usize,
    pub trade_count: usize,
    pub chart: String,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate<'a> {
    pub message: &'a str,
    pub status: u16,
}
