//! Core domain types and logic.

pub mod account;
pub mod bar;
pub mod chart;
pub mod data_handler;
pub mod error;
pub mod order;
pub mod position;
pub mod position_manager;
pub mod signal;
pub mod sizing;
pub mod trade;
