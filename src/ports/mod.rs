//! Port traits implemented by adapters.

pub mod broker_port;
pub mod config_port;
pub mod data_port;
pub mod market_data_port;
pub mod trade_log_port;
