//! Kline stream monitor.
//!
//! Wires the components together:
//! - Symbol universe resolution and bounded-concurrency REST backfill
//! - Combined-stream transport with resubscription after reconnect
//! - One consumer task per stream feeding the history store
//! - Feature pipeline, alert channel and adaptive filtering

pub mod config;
pub mod consumer;
pub mod error;
pub mod monitor;

pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{BackfillReport, KlineSeries, Monitor};
