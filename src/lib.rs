//! Smart Money Concepts signal and risk engine.
//!
//! Candle series flow through market structure analysis, POI detection and
//! multi-timeframe setup assembly, then order-type classification, risk
//! gating and position sizing. The engine modules are pure and synchronous;
//! I/O lives in [`feed`], [`signal_tracker`] stores and the binaries.

pub mod config;
pub mod error;
pub mod feed;
pub mod order_type;
pub mod poi_detector;
pub mod risk_manager;
pub mod signal_generator;
pub mod signal_tracker;
pub mod smc_analyzer;
pub mod structure;
pub mod types;

pub use error::SmcError;
pub use signal_generator::{Rejection, Signal, SignalGenerator};
pub use smc_analyzer::{NoSetup, SmcAnalyzer};
