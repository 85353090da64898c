//! Feed error types.

use klmon_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Feature engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;
