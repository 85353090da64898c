//! Prometheus metrics for the kline monitor.
//!
//! Covers:
//! - Stream connection state and reconnects
//! - Router fan-out drops
//! - Subscription batches
//! - History store and backfill
//! - Feature pipeline and alert delivery
//! - Adaptive filter membership and scores
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, Histogram, IntCounter, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Stream connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "klmon_ws_connected",
        "Stream connection state (1=connected)"
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_ws_reconnect_total",
        "Total stream reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Inbound frames that could not be decoded.
pub static WS_DECODE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "klmon_ws_decode_errors_total",
        "Inbound frames discarded because they could not be decoded"
    )
    .unwrap()
});

/// Outbound control messages.
/// Labels: kind (subscribe/unsubscribe/pong)
pub static WS_MSGS_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_ws_msgs_sent_total",
        "Total outbound messages sent",
        &["kind"]
    )
    .unwrap()
});

/// Payloads dropped because a subscriber channel was full.
pub static ROUTER_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "klmon_router_dropped_total",
        "Payloads dropped on a full subscriber channel"
    )
    .unwrap()
});

/// Envelopes for streams with no registered subscriber.
pub static ROUTER_UNROUTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "klmon_router_unrouted_total",
        "Envelopes discarded because no subscriber was registered"
    )
    .unwrap()
});

/// Registered subscriber channels.
pub static ROUTER_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "klmon_router_subscribers",
        "Number of registered subscriber channels"
    )
    .unwrap()
});

/// Subscription batches.
/// Labels: result (ok/failed)
pub static SUBSCRIBE_BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_subscribe_batches_total",
        "Subscription batches issued",
        &["result"]
    )
    .unwrap()
});

/// Series held by the history store.
pub static HISTORY_SERIES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "klmon_history_series",
        "Number of kline series held in memory"
    )
    .unwrap()
});

/// Historical backfill fetches.
/// Labels: result (ok/failed)
pub static BACKFILL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_backfill_total",
        "Historical backfill fetches per series",
        &["result"]
    )
    .unwrap()
});

/// Feature engine invocations.
pub static FEATURE_COMPUTATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "klmon_feature_computations_total",
        "Feature engine invocations"
    )
    .unwrap()
});

/// Alerts forwarded or dropped.
/// Labels: result (sent/dropped)
pub static ALERTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_alerts_total",
        "Alerts produced by the feature engine",
        &["result"]
    )
    .unwrap()
});

/// Symbols currently scored by the adaptive filter.
pub static FILTER_TRACKED_SYMBOLS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "klmon_filter_tracked_symbols",
        "Symbols with a live score record"
    )
    .unwrap()
});

/// Evictions from the adaptive filter.
/// Labels: reason (inactive/low_score/alert_stale)
pub static FILTER_EVICTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "klmon_filter_evictions_total",
        "Symbols evicted from the adaptive filter",
        &["reason"]
    )
    .unwrap()
});

/// Distribution of smoothed scores.
pub static FILTER_SCORE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "klmon_filter_score",
        "Smoothed symbol score after each observation",
        vec![5.0, 10.0, 15.0, 20.0, 30.0, 40.0, 50.0, 60.0, 80.0, 100.0]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record stream connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record stream disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Record a reconnection attempt.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn ws_decode_error() {
        WS_DECODE_ERRORS_TOTAL.inc();
    }

    /// Record an outbound message by kind.
    pub fn ws_msg_sent(kind: &str) {
        WS_MSGS_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn router_dropped() {
        ROUTER_DROPPED_TOTAL.inc();
    }

    pub fn router_unrouted() {
        ROUTER_UNROUTED_TOTAL.inc();
    }

    pub fn router_subscribers(count: usize) {
        ROUTER_SUBSCRIBERS.set(count as i64);
    }

    /// Record a subscription batch outcome.
    pub fn subscribe_batch(ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        SUBSCRIBE_BATCHES_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn history_series(count: usize) {
        HISTORY_SERIES.set(count as i64);
    }

    /// Record a backfill outcome for one series.
    pub fn backfill(ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        BACKFILL_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn feature_computed() {
        FEATURE_COMPUTATIONS_TOTAL.inc();
    }

    pub fn alert_sent() {
        ALERTS_TOTAL.with_label_values(&["sent"]).inc();
    }

    pub fn alert_dropped() {
        ALERTS_TOTAL.with_label_values(&["dropped"]).inc();
    }

    pub fn filter_tracked(count: usize) {
        FILTER_TRACKED_SYMBOLS.set(count as i64);
    }

    /// Record an eviction by rule.
    pub fn filter_evicted(reason: &str) {
        FILTER_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn filter_score(score: f64) {
        FILTER_SCORE.observe(score);
    }

    /// Render every registered metric in the Prometheus text format.
    ///
    /// Serving this over HTTP is left to the embedding process.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_update_registry() {
        Metrics::ws_connected();
        Metrics::router_dropped();
        Metrics::subscribe_batch(true);
        Metrics::filter_evicted("inactive");

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("klmon_ws_connected 1"));
        assert!(text.contains("klmon_router_dropped_total"));
        assert!(text.contains("klmon_subscribe_batches_total{result=\"ok\"}"));
        assert!(text.contains("klmon_filter_evictions_total{reason=\"inactive\"}"));
    }
}
