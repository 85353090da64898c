//! Error types for klmon-core.

use thiserror::Error;

/// Core error types.
///
/// All variants are validation failures: input is rejected immediately
/// and never replaced by a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid timeframe: {0:?}")]
    InvalidTimeframe(String),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Invalid stream id: {0:?}")]
    InvalidStreamId(String),

    #[error("Invalid kline: {0}")]
    InvalidKline(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
