//! Filter error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid filter configuration: {0}")]
    InvalidConfig(String),
}

pub type FilterResult<T> = Result<T, FilterError>;
