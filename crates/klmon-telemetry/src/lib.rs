//! Prometheus metrics and structured logging for the kline monitor.
//!
//! - Prometheus metrics for transport, routing, history, pipeline and filter
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
