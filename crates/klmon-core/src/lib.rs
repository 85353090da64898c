//! Core domain types for the kline stream monitor.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Timeframe`: The fixed registry of supported kline intervals
//! - `Symbol`, `SeriesKey`, `StreamId`: Identity of a (symbol, timeframe) series
//! - `Kline`: One candlestick
//! - `Features`, `Alert`: Values produced by the feature engine

pub mod error;
pub mod market;
pub mod timeframe;
pub mod types;

pub use error::{CoreError, Result};
pub use market::{SeriesKey, StreamId, Symbol};
pub use timeframe::Timeframe;
pub use types::{Alert, Features, Kline};
