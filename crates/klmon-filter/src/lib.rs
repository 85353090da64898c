//! Adaptive scoring and filtering of monitored symbols.
//!
//! Every feature computation updates an exponentially smoothed activity
//! score per symbol. Periodic maintenance evicts stale symbols and
//! publishes the top-N ranking consumed downstream.

pub mod config;
pub mod error;
pub mod filter;
pub mod score;

pub use config::FilterConfig;
pub use error::{FilterError, FilterResult};
pub use filter::{AdaptiveFilter, EvictionReason, RankingSnapshot, SymbolScore};
pub use score::{raw_score, smooth};
