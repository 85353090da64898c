//! Stream router.
//!
//! Demultiplexes combined-stream envelopes to one bounded channel per
//! stream identifier. Dispatch never blocks: a full channel drops the
//! payload so one slow consumer cannot stall the shared connection.

use klmon_core::StreamId;
use klmon_telemetry::Metrics;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Result of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payload queued on the subscriber channel.
    Delivered,
    /// Subscriber channel full; payload discarded.
    Dropped,
    /// No live subscriber for the stream; payload discarded.
    Unrouted,
}

/// Per-stream fan-out table.
#[derive(Default)]
pub struct StreamRouter {
    subscribers: RwLock<HashMap<StreamId, mpsc::Sender<Value>>>,
    dropped: AtomicU64,
    unrouted: AtomicU64,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber channel for `stream`.
    ///
    /// Re-registering the same stream replaces its channel; the previous
    /// receiver sees the channel close.
    pub fn add_subscriber(&self, stream: StreamId, buffer_size: usize) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let count = {
            let mut subscribers = self.subscribers.write();
            if subscribers.insert(stream.clone(), tx).is_some() {
                debug!(stream = %stream, "Replaced subscriber channel");
            }
            subscribers.len()
        };
        Metrics::router_subscribers(count);
        rx
    }

    /// Remove the subscriber for `stream`, closing its channel.
    pub fn remove_subscriber(&self, stream: &str) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(stream).is_some();
            (removed, subscribers.len())
        };
        Metrics::router_subscribers(count);
        removed
    }

    /// Route one payload.
    pub fn dispatch(&self, stream: &str, data: Value) -> DispatchOutcome {
        let subscribers = self.subscribers.read();
        let Some(tx) = subscribers.get(stream) else {
            trace!(stream, "No subscriber, discarding");
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            Metrics::router_unrouted();
            return DispatchOutcome::Unrouted;
        };

        match tx.try_send(data) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                Metrics::router_dropped();
                warn!(stream, dropped_total = total, "Subscriber channel full, dropping payload");
                DispatchOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(stream, "Subscriber gone, discarding");
                self.unrouted.fetch_add(1, Ordering::Relaxed);
                Metrics::router_unrouted();
                DispatchOutcome::Unrouted
            }
        }
    }

    /// Close every subscriber channel. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut subscribers = self.subscribers.write();
            let closed = subscribers.len();
            subscribers.clear();
            closed
        };
        Metrics::router_subscribers(0);
        closed
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.subscribers.read().contains_key(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Payloads dropped on full channels since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Payloads with no live subscriber since creation.
    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn stream(id: &str) -> StreamId {
        StreamId::from_wire(id)
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_matching_stream() {
        let router = StreamRouter::new();
        let mut btc = router.add_subscriber(stream("btcusdt@kline_3m"), 4);
        let mut eth = router.add_subscriber(stream("ethusdt@kline_3m"), 4);

        assert_eq!(
            router.dispatch("btcusdt@kline_3m", json!({"n": 1})),
            DispatchOutcome::Delivered
        );

        assert_eq!(btc.recv().await.unwrap()["n"], 1);
        assert!(eth.try_recv().is_err());
    }

    #[test]
    fn test_unknown_stream_is_unrouted() {
        let router = StreamRouter::new();
        assert_eq!(
            router.dispatch("btcusdt@kline_1m", json!({})),
            DispatchOutcome::Unrouted
        );
        assert_eq!(router.unrouted_count(), 1);
        assert_eq!(router.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let router = StreamRouter::new();
        let _rx = router.add_subscriber(stream("btcusdt@kline_3m"), 2);

        let outcomes = tokio::time::timeout(Duration::from_secs(1), async {
            (0..5)
                .map(|i| router.dispatch("btcusdt@kline_3m", json!({"n": i})))
                .collect::<Vec<_>>()
        })
        .await
        .expect("dispatch must not block");

        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::Delivered,
                DispatchOutcome::Delivered,
                DispatchOutcome::Dropped,
                DispatchOutcome::Dropped,
                DispatchOutcome::Dropped,
            ]
        );
        // One drop per full-channel event.
        assert_eq!(router.dropped_count(), 3);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_channel() {
        let router = StreamRouter::new();
        let mut stale = router.add_subscriber(stream("btcusdt@kline_3m"), 4);
        let mut fresh = router.add_subscriber(stream("btcusdt@kline_3m"), 4);
        assert_eq!(router.subscriber_count(), 1);

        router.dispatch("btcusdt@kline_3m", json!({"n": 2}));

        assert!(stale.recv().await.is_none());
        assert_eq!(fresh.recv().await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn test_close_all_ends_consumers() {
        let router = StreamRouter::new();
        let mut a = router.add_subscriber(stream("btcusdt@kline_3m"), 4);
        let mut b = router.add_subscriber(stream("btcusdt@kline_4h"), 4);

        assert_eq!(router.close_all(), 2);
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_subscriber() {
        let router = StreamRouter::new();
        let mut rx = router.add_subscriber(stream("btcusdt@kline_3m"), 4);

        assert!(router.remove_subscriber("btcusdt@kline_3m"));
        assert!(!router.remove_subscriber("btcusdt@kline_3m"));
        assert!(rx.recv().await.is_none());
        assert!(!router.contains("btcusdt@kline_3m"));
    }
}
