//! Core domain types and logic.

pub mod backtest;
pub mod config_validation;
pub mod engine;
pub mod equity;
pub mod error;
pub mod market_filter;
pub mod metrics;
pub mod ohlcv;
pub mod policy;
pub mod position;
pub mod run_id;
pub mod signal;
pub mod summary;
