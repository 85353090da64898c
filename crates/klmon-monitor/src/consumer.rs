//! Per-stream consumer.
//!
//! One task per subscribed stream drains its router channel in arrival
//! order, so updates to a series never race each other. The task ends
//! when the router closes the channel.

use klmon_core::SeriesKey;
use klmon_feed::{decode_kline_event, FeaturePipeline, FeedResult, HistoryStore, UpdateKind};
use klmon_filter::AdaptiveFilter;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// What one payload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Stored; buffer too short for features.
    Stored,
    /// Stored and features computed.
    Computed,
    /// Older than the newest stored kline.
    Stale,
    /// Payload belongs to another series.
    Mismatched,
}

/// Shared state every consumer writes into.
#[derive(Clone)]
pub struct SeriesConsumer {
    history: Arc<HistoryStore>,
    pipeline: Arc<FeaturePipeline>,
    filter: Arc<AdaptiveFilter>,
}

impl SeriesConsumer {
    pub fn new(
        history: Arc<HistoryStore>,
        pipeline: Arc<FeaturePipeline>,
        filter: Arc<AdaptiveFilter>,
    ) -> Self {
        Self {
            history,
            pipeline,
            filter,
        }
    }

    /// Apply one raw stream payload to `key`'s series.
    pub fn consume(&self, key: &SeriesKey, data: &Value) -> FeedResult<ConsumeOutcome> {
        let event = decode_kline_event(data)?;
        if &event.key != key {
            warn!(
                series = %key,
                payload = %event.key,
                "Payload does not match stream, discarding"
            );
            return Ok(ConsumeOutcome::Mismatched);
        }

        let update = self.history.update(key, event.kline);
        if update.kind == UpdateKind::Stale {
            return Ok(ConsumeOutcome::Stale);
        }
        trace!(series = %key, len = update.snapshot.len(), closed = event.is_closed, "Kline stored");

        match self.pipeline.on_buffer_updated(key, &update.snapshot)? {
            Some(output) => {
                let undelivered = output.undelivered();
                if undelivered > 0 {
                    debug!(series = %key, undelivered, "Alerts not delivered");
                }
                self.filter
                    .observe(&output.features, &output.alerts, chrono::Utc::now());
                Ok(ConsumeOutcome::Computed)
            }
            None => Ok(ConsumeOutcome::Stored),
        }
    }

    /// Drain `rx` until the router closes it.
    pub fn spawn(&self, key: SeriesKey, mut rx: mpsc::Receiver<Value>) -> JoinHandle<()> {
        let consumer = self.clone();
        tokio::spawn(async move {
            debug!(series = %key, "Consumer started");
            while let Some(data) = rx.recv().await {
                if let Err(e) = consumer.consume(&key, &data) {
                    warn!(series = %key, error = %e, "Discarding kline payload");
                }
            }
            debug!(series = %key, "Consumer stopped");
        })
    }
}
