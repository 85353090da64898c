//! Subscription batching.
//!
//! Splits a symbol list into fixed-size batches and sends one SUBSCRIBE per
//! batch with a pause between batches to stay under exchange throttling.

use crate::connection::ConnectionManager;
use crate::error::{WsError, WsResult};
use klmon_core::{StreamId, Symbol, Timeframe};
use klmon_telemetry::Metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for subscribe requests.
pub trait SubscriptionSink: Send + Sync {
    /// Send one SUBSCRIBE for `streams`, returning the request id.
    fn subscribe(&self, streams: Vec<StreamId>) -> impl Future<Output = WsResult<u64>> + Send;
}

impl SubscriptionSink for ConnectionManager {
    fn subscribe(&self, streams: Vec<StreamId>) -> impl Future<Output = WsResult<u64>> + Send {
        self.send_subscribe(streams)
    }
}

impl<T: SubscriptionSink> SubscriptionSink for Arc<T> {
    fn subscribe(&self, streams: Vec<StreamId>) -> impl Future<Output = WsResult<u64>> + Send {
        (**self).subscribe(streams)
    }
}

/// Batcher configuration.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Default batch size.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub pacing: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pacing: Duration::from_millis(100),
        }
    }
}

/// Split `items` into contiguous batches of at most `batch_size`.
///
/// Produces `ceil(len / batch_size)` batches whose concatenation is the
/// input. A zero `batch_size` is treated as 1.
pub fn partition<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    items.chunks(batch_size.max(1)).collect()
}

/// Issues paced subscription batches through a sink.
pub struct SubscriptionBatcher<S> {
    sink: S,
    config: BatcherConfig,
}

impl<S: SubscriptionSink> SubscriptionBatcher<S> {
    pub fn new(sink: S, config: BatcherConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Subscribe to the kline stream of every symbol at `timeframe`.
    ///
    /// Fails fast: the first failing batch aborts the rest and is reported
    /// as `WsError::BatchFailed { index, .. }`. Returns the number of
    /// batches sent.
    pub async fn batch_subscribe(
        &self,
        symbols: &[Symbol],
        timeframe: Timeframe,
        batch_size: usize,
    ) -> WsResult<usize> {
        if batch_size == 0 {
            return Err(WsError::InvalidBatchSize(batch_size));
        }

        let batches = partition(symbols, batch_size);
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }

            let streams: Vec<StreamId> = batch
                .iter()
                .map(|symbol| StreamId::kline(symbol, timeframe))
                .collect();

            match self.sink.subscribe(streams).await {
                Ok(id) => {
                    Metrics::subscribe_batch(true);
                    debug!(
                        index,
                        id,
                        size = batch.len(),
                        timeframe = %timeframe,
                        "Subscription batch sent"
                    );
                }
                Err(e) => {
                    Metrics::subscribe_batch(false);
                    warn!(index, total, timeframe = %timeframe, error = %e, "Subscription batch failed");
                    return Err(WsError::BatchFailed {
                        index,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            symbols = symbols.len(),
            batches = total,
            timeframe = %timeframe,
            "Subscriptions sent"
        );
        Ok(total)
    }

    /// `batch_subscribe` with the configured batch size.
    pub async fn subscribe_all(&self, symbols: &[Symbol], timeframe: Timeframe) -> WsResult<usize> {
        self.batch_subscribe(symbols, timeframe, self.config.batch_size)
            .await
    }
}
