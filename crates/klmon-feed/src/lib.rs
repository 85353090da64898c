//! Kline ingestion for the monitor.
//!
//! Decodes stream payloads into klines, keeps a bounded rolling history per
//! (symbol, timeframe) and feeds the external feature engine once enough
//! history exists.

pub mod error;
pub mod history;
pub mod parser;
pub mod pipeline;

pub use error::{FeedError, FeedResult};
pub use history::{HistoryStore, HistoryUpdate, UpdateKind, DEFAULT_CAPACITY};
pub use parser::{decode_kline_event, KlineEvent};
pub use pipeline::{
    AlertDelivery, FeatureEngine, FeaturePipeline, PipelineConfig, PipelineOutput,
};
