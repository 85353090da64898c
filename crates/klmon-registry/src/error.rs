//! Registry error types.

use klmon_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
