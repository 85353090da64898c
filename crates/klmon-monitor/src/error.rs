//! Monitor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Validation error: {0}")]
    Validation(#[from] klmon_core::CoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] klmon_registry::RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] klmon_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] klmon_feed::FeedError),

    #[error("Filter error: {0}")]
    Filter(#[from] klmon_filter::FilterError),

    #[error("Monitor already started")]
    AlreadyStarted,

    #[error("Monitor closed")]
    Closed,
}

pub type MonitorResult<T> = Result<T, MonitorError>;
