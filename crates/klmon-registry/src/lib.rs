//! REST collaborator for the kline monitor.
//!
//! Fetches the instrument catalog used to resolve the symbol universe and
//! paginated historical klines used for backfill.

pub mod catalog;
pub mod client;
pub mod error;

pub use catalog::{select_perpetual_usdt, ExchangeInfo, SymbolInfo};
pub use client::{paginate, MarketDataClient, MarketDataSource, MAX_KLINES_PER_REQUEST};
pub use error::{RegistryError, RegistryResult};
