//! Account state, position sizing and exit rules.
//!
//! A [`PositionManager`] runs either against a live broker through
//! [`BrokerPort`] or against a simulated cash account. Both modes share the
//! sizing and exit logic; only account data and order execution differ.

use chrono::{NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::account::{AccountInfo, EquityPoint};
use super::error::DashtraderError;
use super::order::{Order, OrderSide, PendingOrder};
use super::position::Position;
use super::signal::Signal;
use super::sizing::SizingParams;
use super::trade::{markers_for, Trade, TradeMarker};
use crate::ports::broker_port::BrokerPort;
use crate::ports::trade_log_port::TradeLog;

const QTY_EPSILON: f64 = 1e-9;

/// Equity points kept by default; one day of one-minute marks.
pub const DEFAULT_EQUITY_POINTS: usize = 1440;

enum Mode {
    Live(Box<dyn BrokerPort + Send + Sync>),
    Simulated,
}

/// Result of asking the manager to close a position.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Simulated close, realised immediately.
    Filled(Trade),
    /// Close order accepted by the broker.
    Submitted { order_id: String },
    Skipped,
}

pub struct PositionManager {
    mode: Mode,
    params: SizingParams,
    positions: BTreeMap<String, Position>,
    pending_closes: HashSet<String>,
    pending_orders: Vec<PendingOrder>,
    starting_balance: f64,
    cash_balance: f64,
    equity: f64,
    trades: Vec<Trade>,
    trade_log: Option<Arc<dyn TradeLog + Send + Sync>>,
    equity_curve: Vec<EquityPoint>,
    equity_capacity: usize,
}

impl PositionManager {
    pub fn simulated(starting_balance: f64, params: SizingParams) -> Self {
        PositionManager {
            mode: Mode::Simulated,
            params,
            positions: BTreeMap::new(),
            pending_closes: HashSet::new(),
            pending_orders: Vec::new(),
            starting_balance,
            cash_balance: starting_balance,
            equity: starting_balance,
            trades: Vec::new(),
            trade_log: None,
            equity_curve: Vec::new(),
            equity_capacity: DEFAULT_EQUITY_POINTS,
        }
    }

    /// Builds a live manager and loads current positions and open orders.
    pub fn live(
        broker: Box<dyn BrokerPort + Send + Sync>,
        params: SizingParams,
        now: NaiveDateTime,
    ) -> Result<Self, DashtraderError> {
        let account = broker.account()?;
        let mut manager = PositionManager {
            mode: Mode::Live(broker),
            params,
            positions: BTreeMap::new(),
            pending_closes: HashSet::new(),
            pending_orders: Vec::new(),
            starting_balance: account.equity,
            cash_balance: account.buying_power,
            equity: account.equity,
            trades: Vec::new(),
            trade_log: None,
            equity_curve: Vec::new(),
            equity_capacity: DEFAULT_EQUITY_POINTS,
        };
        manager.refresh_from_broker(now)?;
        manager.refresh_pending_orders()?;
        Ok(manager)
    }

    /// Attaches persistent trade storage and loads its history. A simulated
    /// account replays the logged fills so cash and positions match it.
    pub fn with_trade_log(
        mut self,
        log: Arc<dyn TradeLog + Send + Sync>,
    ) -> Result<Self, DashtraderError> {
        let history = log.list_trades()?;
        if self.is_simulated() {
            for trade in &history {
                let order = Order::new(trade.ticker.clone(), trade.quantity, trade.price, trade.side);
                if let Err(err) = self.fill(&order, trade.time) {
                    warn!(ticker = %trade.ticker, time = %trade.time, "skipping logged trade: {err}");
                }
            }
            self.recompute_equity();
            info!(
                trades = history.len(),
                positions = self.positions.len(),
                "replayed trade log: cash ${:.2}, equity ${:.2}",
                self.cash_balance,
                self.equity
            );
        }
        self.trades = history;
        self.trade_log = Some(log);
        Ok(self)
    }

    /// Caps the number of points kept on the equity curve; oldest go first.
    pub fn with_equity_capacity(mut self, capacity: usize) -> Self {
        self.equity_capacity = capacity.max(1);
        self.trim_equity_curve();
        self
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.mode, Mode::Simulated)
    }

    pub fn params(&self) -> &SizingParams {
        &self.params
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn pending_closes(&self) -> &HashSet<String> {
        &self.pending_closes
    }

    pub fn pending_orders(&self) -> &[PendingOrder] {
        &self.pending_orders
    }

    pub fn starting_balance(&self) -> f64 {
        self.starting_balance
    }

    pub fn cash_balance(&self) -> f64 {
        self.cash_balance
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn trade_markers(&self, ticker: &str) -> Vec<TradeMarker> {
        markers_for(&self.trades, ticker)
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn account_info(&self) -> Result<AccountInfo, DashtraderError> {
        match &self.mode {
            Mode::Live(broker) => broker.account(),
            Mode::Simulated => Ok(AccountInfo::cash(self.equity, self.cash_balance)),
        }
    }

    /// Summed exposure of positions that are not waiting to be closed.
    pub fn total_exposure(&self, equity: f64) -> f64 {
        self.positions
            .values()
            .filter(|p| !self.pending_closes.contains(&p.ticker))
            .map(|p| p.exposure(equity))
            .sum()
    }

    /// Shares to trade so `ticker` approaches its target size, and whether
    /// the trade is allowed at all.
    pub fn calculate_target_position(
        &self,
        ticker: &str,
        price: f64,
        side: OrderSide,
        target_pct: Option<f64>,
    ) -> Result<(i64, bool), DashtraderError> {
        if !price.is_finite() || price <= 0.0 {
            debug!(ticker, price, "refusing to size against a non-positive price");
            return Ok((0, false));
        }
        let equity = self.account_info()?.equity;
        debug!(ticker, equity, price, %side, "calculating target position");

        let total_exposure = self.total_exposure(equity);
        if side == OrderSide::Buy && total_exposure >= self.params.max_total_exposure {
            debug!(total_exposure, "maximum total exposure reached");
            return Ok((0, false));
        }

        let position_size = target_pct.unwrap_or(self.params.max_position_size);
        let target_value = equity * position_size;

        let current = self
            .positions
            .get(ticker)
            .filter(|_| !self.pending_closes.contains(ticker));

        let Some(current) = current else {
            let shares = (target_value / price).floor() as i64;
            debug!(
                "new {:.1}% position: {} shares @ ${:.2}",
                position_size * 100.0,
                shares,
                price
            );
            return Ok((shares, side == OrderSide::Buy));
        };

        let current_exposure = current.exposure(equity);
        if side == OrderSide::Buy && current_exposure >= position_size {
            debug!(ticker, current_exposure, "target position size reached");
            return Ok((0, false));
        }
        if side == OrderSide::Sell && current.quantity.abs() < QTY_EPSILON {
            debug!(ticker, "no shares to sell");
            return Ok((0, false));
        }
        if current.pl_pct() < self.params.add_loss_threshold {
            info!(
                ticker,
                "position moving against us: {:.1}% P&L",
                current.pl_pct() * 100.0
            );
            return Ok((0, false));
        }

        let shares = ((target_value - current.quantity * price) / price).floor() as i64;
        debug!(ticker, shares, "adjusting existing position toward target");
        Ok((shares, true))
    }

    /// Whether any exit rule fires for `ticker` given `signal`.
    pub fn should_close_position(
        &self,
        ticker: &str,
        signal: &Signal,
        now: NaiveDateTime,
    ) -> Result<bool, DashtraderError> {
        let Some(position) = self.positions.get(ticker) else {
            return Ok(false);
        };

        let equity = self.account_info()?.equity;
        let total_exposure: f64 = self.positions.values().map(|p| p.exposure(equity)).sum();
        let p = &self.params;
        let long = position.side == OrderSide::Buy;

        let mut reasons: Vec<String> = Vec::new();

        if position.pl_pct() < p.stop_loss_pct {
            reasons.push(format!("stop loss hit: {:.1}% P&L", position.pl_pct() * 100.0));
        }

        if let Some(score) = signal.score {
            if long && score < p.long_exit_score {
                reasons.push(format!("weak technical score for long: {score:.2}"));
            } else if !long && score > p.short_exit_score {
                reasons.push(format!("strong technical score for short: {score:.2}"));
            }

            if total_exposure > p.max_total_exposure
                && ((long && score < 0.5) || (!long && score > 0.5))
            {
                reasons.push(format!(
                    "reducing exposure ({:.1}% total)",
                    total_exposure * 100.0
                ));
            }
        }

        if let Some(momentum) = signal.momentum {
            if long && momentum < -p.momentum_threshold {
                reasons.push(format!("negative momentum for long: {:.1}%", momentum * 100.0));
            } else if !long && momentum > p.momentum_threshold {
                reasons.push(format!("positive momentum for short: {:.1}%", momentum * 100.0));
            }
        }

        let age = position.age_days(now);
        if age > p.stagnant_days && position.pl_pct().abs() < p.stagnant_band {
            reasons.push(format!("stagnant position after {age} days"));
        }

        if reasons.is_empty() {
            return Ok(false);
        }
        debug!(ticker, reasons = %reasons.join(", "), "closing position");
        Ok(true)
    }

    /// Stop-loss sweep over held positions at the given prices. Returns the
    /// tickers for which a close was filled or submitted.
    pub fn check_positions(
        &mut self,
        prices: &HashMap<String, f64>,
        now: NaiveDateTime,
    ) -> Result<Vec<String>, DashtraderError> {
        let held: Vec<String> = self.positions.keys().cloned().collect();
        let mut closed = Vec::new();

        for ticker in held {
            let Some(&price) = prices.get(&ticker) else {
                debug!(%ticker, "no price available, skipping exit check");
                continue;
            };
            let signal = Signal::stop_loss(ticker.clone(), price);
            if self.should_close_position(&ticker, &signal, now)? {
                info!(%ticker, "detected signal to close position");
                match self.close_position(&ticker, &signal, now)? {
                    CloseOutcome::Skipped => {}
                    _ => closed.push(ticker),
                }
            }
        }
        Ok(closed)
    }

    pub fn close_position(
        &mut self,
        ticker: &str,
        signal: &Signal,
        now: NaiveDateTime,
    ) -> Result<CloseOutcome, DashtraderError> {
        if self.is_simulated() {
            return self.close_position_simulated(ticker, signal.price, now);
        }
        let Mode::Live(broker) = &self.mode else {
            return Ok(CloseOutcome::Skipped);
        };

        if self.pending_closes.contains(ticker) {
            debug!(ticker, "close order already pending");
            return Ok(CloseOutcome::Skipped);
        }

        let available = broker
            .positions()?
            .into_iter()
            .find(|p| p.ticker == ticker)
            .map(|p| p.qty_available.abs() > QTY_EPSILON);
        match available {
            None => {
                debug!(ticker, "position not found at broker");
                return Ok(CloseOutcome::Skipped);
            }
            Some(false) => {
                debug!(ticker, "all shares held for orders");
                return Ok(CloseOutcome::Skipped);
            }
            Some(true) => {}
        }

        let order = broker.close_position(ticker)?;
        if order.is_accepted() {
            debug!(ticker, order_id = %order.order_id, "close order queued");
            self.pending_closes.insert(ticker.to_string());
            Ok(CloseOutcome::Submitted {
                order_id: order.order_id,
            })
        } else {
            warn!(ticker, status = %order.status, "close order not accepted");
            Ok(CloseOutcome::Skipped)
        }
    }

    fn close_position_simulated(
        &mut self,
        ticker: &str,
        price: f64,
        now: NaiveDateTime,
    ) -> Result<CloseOutcome, DashtraderError> {
        let Some(mut position) = self.positions.remove(ticker) else {
            return Ok(CloseOutcome::Skipped);
        };

        self.cash_balance += position.quantity * price;
        position.update_pl(price);
        position.is_open = false;

        let side = match position.side {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        };
        let trade = Trade {
            time: now,
            ticker: ticker.to_string(),
            side,
            price,
            quantity: position.quantity.abs(),
        };
        info!(
            ticker,
            "closed {} shares @ ${:.2}, realised P&L ${:.2}",
            trade.quantity,
            price,
            position.pl()
        );
        self.record_trade(trade.clone())?;
        self.recompute_equity();
        Ok(CloseOutcome::Filled(trade))
    }

    /// Fills `order` against the simulated account.
    pub fn apply_order(
        &mut self,
        order: &Order,
        at: NaiveDateTime,
    ) -> Result<Trade, DashtraderError> {
        if !self.is_simulated() {
            return Err(DashtraderError::Broker {
                reason: "order execution is only available in simulated mode".into(),
            });
        }
        if !(order.quantity > 0.0 && order.quantity.is_finite()) {
            return Err(DashtraderError::InvalidOrder {
                ticker: order.ticker.clone(),
                reason: "quantity must be positive".into(),
            });
        }
        if !(order.price > 0.0 && order.price.is_finite()) {
            return Err(DashtraderError::InvalidOrder {
                ticker: order.ticker.clone(),
                reason: "price must be positive".into(),
            });
        }

        let filled_qty = self.fill(order, at)?;
        let trade = Trade {
            time: at,
            ticker: order.ticker.clone(),
            side: order.side,
            price: order.price,
            quantity: filled_qty,
        };
        self.record_trade(trade.clone())?;
        self.recompute_equity();
        Ok(trade)
    }

    /// Moves cash and position state for one fill. Returns the filled quantity.
    fn fill(&mut self, order: &Order, at: NaiveDateTime) -> Result<f64, DashtraderError> {
        let filled_qty = match order.side {
            OrderSide::Buy => {
                let cost = order.notional();
                if cost > self.cash_balance {
                    debug!(ticker = %order.ticker, "insufficient funds to buy");
                    return Err(DashtraderError::InsufficientFunds {
                        ticker: order.ticker.clone(),
                        required: cost,
                        available: self.cash_balance,
                    });
                }
                self.cash_balance -= cost;
                match self.positions.get_mut(&order.ticker) {
                    Some(pos) => {
                        let new_qty = pos.quantity + order.quantity;
                        if new_qty.abs() > QTY_EPSILON {
                            pos.entry_price = (pos.quantity * pos.entry_price + order.notional())
                                / new_qty;
                        }
                        pos.quantity = new_qty;
                        pos.side = OrderSide::from_quantity(new_qty);
                        pos.update_pl(order.price);
                    }
                    None => {
                        let pos = Position::open(order.ticker.clone(), order.quantity, order.price, at);
                        self.positions.insert(order.ticker.clone(), pos);
                    }
                }
                order.quantity
            }
            OrderSide::Sell => {
                let Some(pos) = self.positions.get_mut(&order.ticker) else {
                    debug!(ticker = %order.ticker, "no position to sell");
                    return Err(DashtraderError::NoPosition {
                        ticker: order.ticker.clone(),
                    });
                };
                let sold = order.quantity.min(pos.quantity.max(0.0));
                if sold <= QTY_EPSILON {
                    return Err(DashtraderError::NoPosition {
                        ticker: order.ticker.clone(),
                    });
                }
                self.cash_balance += sold * order.price;
                pos.quantity -= sold;
                pos.update_pl(order.price);
                if pos.quantity.abs() <= QTY_EPSILON {
                    self.positions.remove(&order.ticker);
                }
                sold
            }
        };
        Ok(filled_qty)
    }

    /// Revalues positions at `prices` and appends a point to the equity curve.
    pub fn mark_to_market(
        &mut self,
        at: NaiveDateTime,
        prices: &HashMap<String, f64>,
    ) -> Result<f64, DashtraderError> {
        for (ticker, &price) in prices {
            if let Some(pos) = self.positions.get_mut(ticker) {
                pos.update_pl(price);
            }
        }

        let live_account = match &self.mode {
            Mode::Live(broker) => Some(broker.account()?),
            Mode::Simulated => None,
        };
        match live_account {
            Some(account) => {
                self.equity = account.equity;
                self.cash_balance = account.buying_power;
            }
            None => self.recompute_equity(),
        }

        self.equity_curve.push(EquityPoint {
            timestamp: at,
            equity: self.equity,
        });
        self.trim_equity_curve();

        if at.minute() % 15 == 0 {
            self.log_status(at);
        }
        Ok(self.equity)
    }

    /// Replaces tracked positions with the broker's view.
    pub fn refresh_from_broker(&mut self, now: NaiveDateTime) -> Result<(), DashtraderError> {
        let Mode::Live(broker) = &self.mode else {
            return Ok(());
        };
        let held = broker.positions()?;

        let mut current: HashSet<String> = HashSet::new();
        for bp in held {
            current.insert(bp.ticker.clone());
            let pos = self
                .positions
                .entry(bp.ticker.clone())
                .or_insert_with(|| Position::open(bp.ticker.clone(), bp.quantity, bp.avg_entry_price, now));
            pos.quantity = bp.quantity;
            pos.entry_price = bp.avg_entry_price;
            pos.side = OrderSide::from_quantity(bp.quantity);
            pos.update_pl(bp.current_price);
        }

        self.positions.retain(|ticker, _| current.contains(ticker));
        self.pending_closes.retain(|ticker| current.contains(ticker));
        self.log_status(now);
        Ok(())
    }

    /// Keeps only broker orders that have not filled yet.
    pub fn refresh_pending_orders(&mut self) -> Result<(), DashtraderError> {
        let Mode::Live(broker) = &self.mode else {
            return Ok(());
        };
        self.pending_orders = broker
            .orders()?
            .into_iter()
            .filter(|o| o.is_pending())
            .map(|o| PendingOrder {
                order_id: o.order_id,
                ticker: o.ticker,
                shares: o.quantity,
                side: o.side,
            })
            .collect();
        Ok(())
    }

    fn record_trade(&mut self, trade: Trade) -> Result<(), DashtraderError> {
        if let Some(log) = &self.trade_log {
            log.record_trade(&trade)?;
        }
        self.trades.push(trade);
        Ok(())
    }

    fn trim_equity_curve(&mut self) {
        let excess = self.equity_curve.len().saturating_sub(self.equity_capacity);
        if excess > 0 {
            self.equity_curve.drain(..excess);
        }
    }

    fn recompute_equity(&mut self) {
        let position_value: f64 = self.positions.values().map(Position::market_value).sum();
        self.equity = self.cash_balance + position_value;
    }

    fn log_status(&self, at: NaiveDateTime) {
        let exposure = self.total_exposure(self.equity);
        info!(
            "portfolio status {}: cash ${:.2}, equity ${:.2}, exposure {:.1}%",
            at,
            self.cash_balance,
            self.equity,
            exposure * 100.0
        );
        for pos in self.positions.values().filter(|p| p.is_open) {
            info!(
                "  {}: {} shares @ ${:.2} ({:.1}% exposure)",
                pos.ticker,
                pos.quantity,
                pos.entry_price,
                pos.exposure(self.equity) * 100.0
            );
        }
        for ticker in &self.pending_closes {
            info!("  pending close: {}", ticker);
        }
        for order in &self.pending_orders {
            info!("  pending order: {} ({})", order.ticker, order.side);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::broker_port::{BrokerOrder, BrokerPosition};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn sim() -> PositionManager {
        PositionManager::simulated(30_000.0, SizingParams::default())
    }

    fn prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    struct MockBroker {
        account: AccountInfo,
        positions: Mutex<Vec<BrokerPosition>>,
        orders: Vec<BrokerOrder>,
        close_status: String,
        close_calls: Mutex<Vec<String>>,
    }

    impl MockBroker {
        fn new(positions: Vec<BrokerPosition>) -> Self {
            MockBroker {
                account: AccountInfo {
                    equity: 50_000.0,
                    buying_power: 80_000.0,
                    initial_margin: 5_000.0,
                    margin_multiplier: 2.0,
                    daytrading_buying_power: 160_000.0,
                },
                positions: Mutex::new(positions),
                orders: Vec::new(),
                close_status: "accepted".into(),
                close_calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl BrokerPort for Arc<MockBroker> {
        fn account(&self) -> Result<AccountInfo, DashtraderError> {
            Ok(self.account.clone())
        }

        fn positions(&self) -> Result<Vec<BrokerPosition>, DashtraderError> {
            Ok(self.positions.lock().unwrap().clone())
        }

        fn orders(&self) -> Result<Vec<BrokerOrder>, DashtraderError> {
            Ok(self.orders.clone())
        }

        fn close_position(&self, ticker: &str) -> Result<BrokerOrder, DashtraderError> {
            self.close_calls.lock().unwrap().push(ticker.to_string());
            Ok(BrokerOrder {
                order_id: format!("close-{ticker}"),
                ticker: ticker.to_string(),
                quantity: 0.0,
                side: OrderSide::Sell,
                status: self.close_status.clone(),
            })
        }
    }

    fn broker_position(ticker: &str, qty: f64, available: f64, entry: f64, price: f64) -> BrokerPosition {
        BrokerPosition {
            ticker: ticker.into(),
            quantity: qty,
            qty_available: available,
            avg_entry_price: entry,
            current_price: price,
        }
    }

    #[test]
    fn simulated_account_starts_at_starting_balance() {
        let pm = sim();
        let info = pm.account_info().unwrap();
        assert_relative_eq!(info.equity, 30_000.0);
        assert_relative_eq!(info.buying_power, 30_000.0);
        assert_eq!(info.initial_margin, 0.0);
        assert_eq!(info.margin_multiplier, 1.0);
    }

    #[test]
    fn buy_debits_cash_once_and_opens_position() {
        let mut pm = sim();
        let trade = pm
            .apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        assert_eq!(trade.side, OrderSide::Buy);
        assert_relative_eq!(pm.cash_balance(), 28_500.0);
        assert_relative_eq!(pm.account_info().unwrap().equity, 30_000.0);
        let pos = pm.position("AAPL").unwrap();
        assert_relative_eq!(pos.quantity, 10.0);
        assert_relative_eq!(pos.entry_price, 150.0);
        assert_eq!(pm.trades().len(), 1);
    }

    #[test]
    fn buy_adds_with_weighted_entry_price() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 100.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.apply_order(&Order::new("AAPL", 10.0, 200.0, OrderSide::Buy), at(1, 11, 0))
            .unwrap();
        let pos = pm.position("AAPL").unwrap();
        assert_relative_eq!(pos.quantity, 20.0);
        assert_relative_eq!(pos.entry_price, 150.0);
    }

    #[test]
    fn buy_rejected_without_funds() {
        let mut pm = sim();
        let err = pm
            .apply_order(&Order::new("AAPL", 1_000.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap_err();
        assert!(matches!(err, DashtraderError::InsufficientFunds { .. }));
        assert_relative_eq!(pm.cash_balance(), 30_000.0);
        assert!(pm.trades().is_empty());
    }

    #[test]
    fn sell_without_position_rejected() {
        let mut pm = sim();
        let err = pm
            .apply_order(&Order::new("AAPL", 5.0, 150.0, OrderSide::Sell), at(1, 10, 0))
            .unwrap_err();
        assert!(matches!(err, DashtraderError::NoPosition { .. }));
    }

    #[test]
    fn sell_reduces_then_removes_position() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.apply_order(&Order::new("AAPL", 4.0, 160.0, OrderSide::Sell), at(1, 11, 0))
            .unwrap();
        assert_relative_eq!(pm.position("AAPL").unwrap().quantity, 6.0);
        assert_relative_eq!(pm.cash_balance(), 28_500.0 + 640.0);

        let trade = pm
            .apply_order(&Order::new("AAPL", 50.0, 160.0, OrderSide::Sell), at(1, 12, 0))
            .unwrap();
        assert_relative_eq!(trade.quantity, 6.0);
        assert!(pm.position("AAPL").is_none());
        assert_relative_eq!(pm.cash_balance(), 30_100.0);
    }

    #[test]
    fn invalid_order_rejected() {
        let mut pm = sim();
        let err = pm
            .apply_order(&Order::new("AAPL", 0.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap_err();
        assert!(matches!(err, DashtraderError::InvalidOrder { .. }));
        let err = pm
            .apply_order(&Order::new("AAPL", 1.0, -1.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap_err();
        assert!(matches!(err, DashtraderError::InvalidOrder { .. }));
    }

    #[test]
    fn mark_to_market_updates_equity_and_curve() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        let equity = pm
            .mark_to_market(at(1, 10, 7), &prices(&[("AAPL", 160.0), ("MSFT", 400.0)]))
            .unwrap();
        assert_relative_eq!(equity, 30_100.0);
        assert_relative_eq!(pm.position("AAPL").unwrap().current_price, 160.0);

        pm.mark_to_market(at(1, 10, 8), &prices(&[("AAPL", 160.0)]))
            .unwrap();
        assert_eq!(pm.equity_curve().len(), 2);
        // repeated marks at the same price must not drift equity
        assert_relative_eq!(pm.equity_curve()[1].equity, 30_100.0);
    }

    #[test]
    fn new_buy_position_sized_from_equity() {
        let pm = sim();
        // 8% of 30,000 = 2,400 -> 16 shares at 150
        let (shares, allowed) = pm
            .calculate_target_position("AAPL", 150.0, OrderSide::Buy, None)
            .unwrap();
        assert_eq!(shares, 16);
        assert!(allowed);
    }

    #[test]
    fn new_sell_position_not_allowed() {
        let pm = sim();
        let (shares, allowed) = pm
            .calculate_target_position("AAPL", 150.0, OrderSide::Sell, None)
            .unwrap();
        assert_eq!(shares, 16);
        assert!(!allowed);
    }

    #[test]
    fn explicit_target_pct_overrides_default() {
        let pm = sim();
        let (shares, _) = pm
            .calculate_target_position("AAPL", 100.0, OrderSide::Buy, Some(0.02))
            .unwrap();
        assert_eq!(shares, 6);
    }

    #[test]
    fn non_positive_price_not_allowed() {
        let pm = sim();
        assert_eq!(
            pm.calculate_target_position("AAPL", 0.0, OrderSide::Buy, None)
                .unwrap(),
            (0, false)
        );
        assert_eq!(
            pm.calculate_target_position("AAPL", f64::NAN, OrderSide::Buy, None)
                .unwrap(),
            (0, false)
        );
    }

    #[test]
    fn existing_position_grows_to_target() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 4.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        // target 2,400, held 600 -> remaining 1,800 -> 12 shares
        let (shares, allowed) = pm
            .calculate_target_position("AAPL", 150.0, OrderSide::Buy, None)
            .unwrap();
        assert_eq!(shares, 12);
        assert!(allowed);
    }

    #[test]
    fn sell_on_position_at_target_is_allowed_with_zero_shares() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 16.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        assert_eq!(
            pm.calculate_target_position("AAPL", 150.0, OrderSide::Sell, None)
                .unwrap(),
            (0, true)
        );
    }

    #[test]
    fn sell_on_oversized_position_returns_negative_shares() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 20.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        // target 2,400, held 3,000 -> -600 -> -4 shares
        assert_eq!(
            pm.calculate_target_position("AAPL", 150.0, OrderSide::Sell, None)
                .unwrap(),
            (-4, true)
        );
    }

    #[test]
    fn existing_position_at_target_not_added() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 16.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.mark_to_market(at(1, 10, 1), &prices(&[("AAPL", 160.0)]))
            .unwrap();
        assert_eq!(
            pm.calculate_target_position("AAPL", 160.0, OrderSide::Buy, None)
                .unwrap(),
            (0, false)
        );
    }

    #[test]
    fn losing_position_not_added() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 2.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.mark_to_market(at(1, 10, 1), &prices(&[("AAPL", 145.0)]))
            .unwrap();
        assert_eq!(
            pm.calculate_target_position("AAPL", 145.0, OrderSide::Buy, None)
                .unwrap(),
            (0, false)
        );
    }

    #[test]
    fn max_total_exposure_blocks_buys() {
        let params = SizingParams {
            max_total_exposure: 0.05,
            ..SizingParams::default()
        };
        let mut pm = PositionManager::simulated(30_000.0, params);
        pm.apply_order(&Order::new("MSFT", 5.0, 400.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        assert_eq!(
            pm.calculate_target_position("AAPL", 150.0, OrderSide::Buy, None)
                .unwrap(),
            (0, false)
        );
    }

    #[test]
    fn should_close_unknown_ticker_is_false() {
        let pm = sim();
        let signal = Signal::stop_loss("AAPL", 100.0);
        assert!(!pm.should_close_position("AAPL", &signal, at(1, 10, 0)).unwrap());
    }

    #[test]
    fn should_close_on_stop_loss() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.mark_to_market(at(1, 10, 1), &prices(&[("AAPL", 140.0)]))
            .unwrap();
        let signal = Signal::stop_loss("AAPL", 140.0);
        assert!(pm.should_close_position("AAPL", &signal, at(1, 10, 1)).unwrap());
    }

    #[test]
    fn should_close_on_weak_score_or_momentum() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        let now = at(1, 10, 5);

        let healthy = Signal::new("markov", "AAPL", 150.0).with_score(0.7);
        assert!(!pm.should_close_position("AAPL", &healthy, now).unwrap());

        let weak = Signal::new("markov", "AAPL", 150.0).with_score(0.3);
        assert!(pm.should_close_position("AAPL", &weak, now).unwrap());

        let falling = Signal::new("markov", "AAPL", 150.0).with_momentum(-0.03);
        assert!(pm.should_close_position("AAPL", &falling, now).unwrap());
    }

    #[test]
    fn should_close_stagnant_position() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        let signal = Signal::stop_loss("AAPL", 150.5);
        assert!(!pm.should_close_position("AAPL", &signal, at(5, 10, 0)).unwrap());
        assert!(pm.should_close_position("AAPL", &signal, at(8, 10, 0)).unwrap());
    }

    #[test]
    fn check_positions_closes_losers_and_skips_missing_prices() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.apply_order(&Order::new("MSFT", 5.0, 400.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.mark_to_market(at(1, 10, 1), &prices(&[("AAPL", 140.0), ("MSFT", 390.0)]))
            .unwrap();

        let closed = pm
            .check_positions(&prices(&[("AAPL", 140.0)]), at(1, 10, 2))
            .unwrap();
        assert_eq!(closed, vec!["AAPL".to_string()]);
        assert!(pm.position("AAPL").is_none());
        assert!(pm.position("MSFT").is_some());

        let last = pm.trades().last().unwrap();
        assert_eq!(last.ticker, "AAPL");
        assert_eq!(last.side, OrderSide::Sell);
        assert_relative_eq!(last.price, 140.0);
    }

    #[test]
    fn simulated_close_credits_proceeds() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        let outcome = pm
            .close_position("AAPL", &Signal::stop_loss("AAPL", 155.0), at(1, 11, 0))
            .unwrap();
        assert!(matches!(outcome, CloseOutcome::Filled(_)));
        assert_relative_eq!(pm.cash_balance(), 30_050.0);
        assert_relative_eq!(pm.account_info().unwrap().equity, 30_050.0);

        let again = pm
            .close_position("AAPL", &Signal::stop_loss("AAPL", 155.0), at(1, 11, 0))
            .unwrap();
        assert_eq!(again, CloseOutcome::Skipped);
    }

    #[test]
    fn live_manager_loads_broker_state() {
        let broker = Arc::new(MockBroker::new(vec![
            broker_position("AAPL", 10.0, 10.0, 150.0, 155.0),
            broker_position("TSLA", -5.0, 5.0, 200.0, 190.0),
        ]));
        let pm = PositionManager::live(Box::new(broker), SizingParams::default(), at(1, 9, 30))
            .unwrap();
        assert!(!pm.is_simulated());
        assert_eq!(pm.position_count(), 2);
        assert_eq!(pm.position("TSLA").unwrap().side, OrderSide::Sell);
        assert_relative_eq!(pm.position("AAPL").unwrap().current_price, 155.0);
        assert_relative_eq!(pm.account_info().unwrap().initial_margin, 5_000.0);
    }

    #[test]
    fn live_refresh_drops_closed_positions() {
        let broker = Arc::new(MockBroker::new(vec![
            broker_position("AAPL", 10.0, 10.0, 150.0, 155.0),
            broker_position("MSFT", 3.0, 3.0, 400.0, 405.0),
        ]));
        let mut pm =
            PositionManager::live(Box::new(broker.clone()), SizingParams::default(), at(1, 9, 30))
                .unwrap();
        broker.positions.lock().unwrap().retain(|p| p.ticker == "AAPL");
        pm.refresh_from_broker(at(1, 9, 31)).unwrap();
        assert_eq!(pm.position_count(), 1);
        assert!(pm.position("MSFT").is_none());
    }

    #[test]
    fn live_close_submits_once() {
        let broker = Arc::new(MockBroker::new(vec![broker_position(
            "AAPL", 10.0, 10.0, 150.0, 140.0,
        )]));
        let mut pm =
            PositionManager::live(Box::new(broker.clone()), SizingParams::default(), at(1, 9, 30))
                .unwrap();
        let signal = Signal::stop_loss("AAPL", 140.0);

        let first = pm.close_position("AAPL", &signal, at(1, 9, 31)).unwrap();
        assert_eq!(
            first,
            CloseOutcome::Submitted {
                order_id: "close-AAPL".into()
            }
        );
        assert!(pm.pending_closes().contains("AAPL"));

        let second = pm.close_position("AAPL", &signal, at(1, 9, 32)).unwrap();
        assert_eq!(second, CloseOutcome::Skipped);
        assert_eq!(broker.close_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn live_close_skipped_when_shares_held() {
        let broker = Arc::new(MockBroker::new(vec![broker_position(
            "AAPL", 10.0, 0.0, 150.0, 140.0,
        )]));
        let mut pm =
            PositionManager::live(Box::new(broker.clone()), SizingParams::default(), at(1, 9, 30))
                .unwrap();
        let outcome = pm
            .close_position("AAPL", &Signal::stop_loss("AAPL", 140.0), at(1, 9, 31))
            .unwrap();
        assert_eq!(outcome, CloseOutcome::Skipped);
        assert!(broker.close_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn live_pending_orders_filtered_by_status() {
        let mut mock = MockBroker::new(Vec::new());
        mock.orders = vec![
            BrokerOrder {
                order_id: "1".into(),
                ticker: "AAPL".into(),
                quantity: 5.0,
                side: OrderSide::Buy,
                status: "new".into(),
            },
            BrokerOrder {
                order_id: "2".into(),
                ticker: "MSFT".into(),
                quantity: 2.0,
                side: OrderSide::Sell,
                status: "filled".into(),
            },
        ];
        let pm = PositionManager::live(Box::new(Arc::new(mock)), SizingParams::default(), at(1, 9, 30))
            .unwrap();
        assert_eq!(pm.pending_orders().len(), 1);
        assert_eq!(pm.pending_orders()[0].ticker, "AAPL");
    }

    #[test]
    fn live_mode_rejects_simulated_fills() {
        let broker = Arc::new(MockBroker::new(Vec::new()));
        let mut pm = PositionManager::live(Box::new(broker), SizingParams::default(), at(1, 9, 30))
            .unwrap();
        let err = pm
            .apply_order(&Order::new("AAPL", 1.0, 150.0, OrderSide::Buy), at(1, 9, 31))
            .unwrap_err();
        assert!(matches!(err, DashtraderError::Broker { .. }));
    }

    #[test]
    fn trade_markers_follow_fills() {
        let mut pm = sim();
        pm.apply_order(&Order::new("AAPL", 10.0, 150.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.apply_order(&Order::new("AAPL", 10.0, 155.0, OrderSide::Sell), at(1, 11, 0))
            .unwrap();
        let markers = pm.trade_markers("AAPL");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].side, OrderSide::Buy);
        assert_eq!(markers[1].side, OrderSide::Sell);
    }

    #[derive(Default)]
    struct MemoryLog {
        trades: Mutex<Vec<Trade>>,
    }

    impl TradeLog for MemoryLog {
        fn record_trade(&self, trade: &Trade) -> Result<(), DashtraderError> {
            self.trades.lock().unwrap().push(trade.clone());
            Ok(())
        }

        fn list_trades(&self) -> Result<Vec<Trade>, DashtraderError> {
            Ok(self.trades.lock().unwrap().clone())
        }
    }

    #[test]
    fn trade_log_replay_restores_cash_and_positions() {
        let log = Arc::new(MemoryLog::default());
        let mut pm = sim().with_trade_log(log.clone()).unwrap();
        pm.apply_order(&Order::new("AAPL", 10.0, 100.0, OrderSide::Buy), at(1, 10, 0))
            .unwrap();
        pm.apply_order(&Order::new("AAPL", 10.0, 200.0, OrderSide::Buy), at(1, 11, 0))
            .unwrap();
        pm.apply_order(&Order::new("MSFT", 5.0, 400.0, OrderSide::Buy), at(1, 12, 0))
            .unwrap();
        pm.close_position("MSFT", &Signal::stop_loss("MSFT", 380.0), at(1, 13, 0))
            .unwrap();
        let cash = pm.cash_balance();
        drop(pm);

        let restored = sim().with_trade_log(log).unwrap();
        assert_eq!(restored.trades().len(), 4);
        assert_relative_eq!(restored.cash_balance(), cash);
        assert_relative_eq!(restored.cash_balance(), 30_000.0 - 3_000.0 - 2_000.0 + 1_900.0);
        assert!(restored.position("MSFT").is_none());
        let aapl = restored.position("AAPL").unwrap();
        assert_relative_eq!(aapl.quantity, 20.0);
        assert_relative_eq!(aapl.entry_price, 150.0);
        assert_eq!(aapl.entry_time, at(1, 10, 0));
        // marked at the last fill price
        assert_relative_eq!(restored.account_info().unwrap().equity, 26_900.0 + 20.0 * 200.0);
    }

    #[test]
    fn trade_log_replay_skips_unfillable_trades() {
        let log = Arc::new(MemoryLog::default());
        log.record_trade(&Trade {
            time: at(1, 10, 0),
            ticker: "AAPL".into(),
            side: OrderSide::Sell,
            price: 150.0,
            quantity: 5.0,
        })
        .unwrap();
        let restored = sim().with_trade_log(log).unwrap();
        assert_eq!(restored.trades().len(), 1);
        assert_eq!(restored.position_count(), 0);
        assert_relative_eq!(restored.cash_balance(), 30_000.0);
    }

    #[test]
    fn equity_curve_keeps_most_recent_points() {
        let mut pm = sim().with_equity_capacity(3);
        for minute in 0..10 {
            pm.mark_to_market(at(1, 10, minute), &HashMap::new()).unwrap();
        }
        let curve = pm.equity_curve();
        assert_eq!(curve.len(), 3);
        assert_eq!(curve[0].timestamp, at(1, 10, 7));
        assert_eq!(curve[2].timestamp, at(1, 10, 9));
    }

    #[test]
    fn equity_capacity_is_at_least_one() {
        let mut pm = sim().with_equity_capacity(0);
        pm.mark_to_market(at(1, 10, 0), &HashMap::new()).unwrap();
        pm.mark_to_market(at(1, 10, 1), &HashMap::new()).unwrap();
        assert_eq!(pm.equity_curve().len(), 1);
    }
}
