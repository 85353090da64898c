//! Feature and alert pipeline.
//!
//! Runs the external feature engine on every buffer update that carries
//! enough history, keeps the latest feature snapshot per symbol and
//! forwards alerts into a bounded channel. Alert delivery is best-effort:
//! a full channel drops the alert instead of blocking the caller.

use crate::error::FeedResult;
use dashmap::DashMap;
use klmon_core::{Alert, Features, Kline, SeriesKey, Symbol};
use klmon_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// External indicator computation.
pub trait FeatureEngine: Send + Sync {
    /// Derive features from a series snapshot, oldest kline first.
    fn compute_features(&self, key: &SeriesKey, history: &[Kline]) -> FeedResult<Features>;

    /// Evaluate alert thresholds for a feature snapshot.
    fn detect_alerts(&self, features: &Features) -> Vec<Alert>;
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Klines required before the engine is invoked.
    pub min_klines: usize,
    /// Alert channel capacity.
    pub alert_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_klines: 20,
            alert_capacity: 1000,
        }
    }
}

/// Outcome of forwarding one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDelivery {
    Sent,
    /// Channel full; alert discarded.
    Dropped,
    /// Pipeline closed or receiver gone.
    Closed,
}

/// Result of one feature computation.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub features: Features,
    pub alerts: Vec<Alert>,
    /// Delivery outcome per alert, in the order of `alerts`.
    pub deliveries: Vec<AlertDelivery>,
}

impl PipelineOutput {
    /// Alerts that did not reach the alert channel.
    pub fn undelivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| **d != AlertDelivery::Sent)
            .count()
    }
}

/// Feature and alert pipeline.
pub struct FeaturePipeline {
    engine: Arc<dyn FeatureEngine>,
    config: PipelineConfig,
    features: DashMap<Symbol, Features>,
    alert_tx: Mutex<Option<mpsc::Sender<Alert>>>,
    alert_rx: Mutex<Option<mpsc::Receiver<Alert>>>,
    computations: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_dropped: AtomicU64,
}

impl FeaturePipeline {
    pub fn new(engine: Arc<dyn FeatureEngine>, config: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.alert_capacity.max(1));
        Self {
            engine,
            config,
            features: DashMap::new(),
            alert_tx: Mutex::new(Some(tx)),
            alert_rx: Mutex::new(Some(rx)),
            computations: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
        }
    }

    /// Handle a buffer update for `key`.
    ///
    /// Buffers shorter than `min_klines` are skipped without invoking the
    /// engine (`Ok(None)`). Otherwise the snapshot for the symbol is
    /// overwritten and every alert is offered to the alert channel.
    pub fn on_buffer_updated(
        &self,
        key: &SeriesKey,
        buffer: &[Kline],
    ) -> FeedResult<Option<PipelineOutput>> {
        if buffer.len() < self.config.min_klines {
            trace!(
                series = %key,
                len = buffer.len(),
                min = self.config.min_klines,
                "Not enough history for features"
            );
            return Ok(None);
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        Metrics::feature_computed();
        let features = self.engine.compute_features(key, buffer)?;
        let alerts = self.engine.detect_alerts(&features);

        self.features
            .insert(features.symbol.clone(), features.clone());

        let deliveries = alerts
            .iter()
            .map(|alert| self.forward_alert(alert.clone()))
            .collect();

        Ok(Some(PipelineOutput {
            features,
            alerts,
            deliveries,
        }))
    }

    fn forward_alert(&self, alert: Alert) -> AlertDelivery {
        let tx = self.alert_tx.lock().clone();
        let Some(tx) = tx else {
            return AlertDelivery::Closed;
        };

        match tx.try_send(alert) {
            Ok(()) => {
                self.alerts_sent.fetch_add(1, Ordering::Relaxed);
                Metrics::alert_sent();
                AlertDelivery::Sent
            }
            Err(mpsc::error::TrySendError::Full(alert)) => {
                self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                Metrics::alert_dropped();
                warn!(
                    symbol = %alert.symbol,
                    alert_type = %alert.alert_type,
                    "Alert channel full, dropping alert"
                );
                AlertDelivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Alert receiver dropped");
                AlertDelivery::Closed
            }
        }
    }

    /// Take the alert receiver. Only the first call returns it.
    pub fn take_alert_receiver(&self) -> Option<mpsc::Receiver<Alert>> {
        self.alert_rx.lock().take()
    }

    /// Latest feature snapshot for a symbol.
    pub fn features(&self, symbol: &Symbol) -> Option<Features> {
        self.features.get(symbol).map(|entry| entry.value().clone())
    }

    /// Copy of every feature snapshot.
    pub fn all_features(&self) -> HashMap<Symbol, Features> {
        self.features
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Close the alert channel. Queued alerts remain readable.
    pub fn close(&self) {
        if self.alert_tx.lock().take().is_some() {
            debug!("Alert channel closed");
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Engine invocations so far.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    /// Alerts discarded on a full channel.
    pub fn alerts_dropped(&self) -> u64 {
        self.alerts_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use chrono::Utc;
    use klmon_core::Timeframe;

    /// Emits `alerts_per_call` alerts per computation.
    struct StubEngine {
        alerts_per_call: usize,
        fail: bool,
    }

    impl FeatureEngine for StubEngine {
        fn compute_features(&self, key: &SeriesKey, history: &[Kline]) -> FeedResult<Features> {
            if self.fail {
                return Err(FeedError::Engine("boom".to_string()));
            }
            let last = &history[history.len() - 1];
            Ok(Features {
                symbol: key.symbol.clone(),
                timeframe: key.timeframe,
                close_time: last.close_time,
                price: last.close,
                rsi14: 50.0,
                volume_ratio5: 1.0,
                volume_trend: 1.0,
                price_change_15min: 0.0,
                volatility: 0.0,
                computed_at: Utc::now(),
            })
        }

        fn detect_alerts(&self, features: &Features) -> Vec<Alert> {
            (0..self.alerts_per_call)
                .map(|i| Alert::new(features.symbol.clone(), "test", format!("alert {i}")))
                .collect()
        }
    }

    fn pipeline(alerts_per_call: usize, alert_capacity: usize) -> FeaturePipeline {
        FeaturePipeline::new(
            Arc::new(StubEngine {
                alerts_per_call,
                fail: false,
            }),
            PipelineConfig {
                min_klines: 20,
                alert_capacity,
            },
        )
    }

    fn test_key() -> SeriesKey {
        SeriesKey::new(Symbol::new("BTCUSDT").unwrap(), Timeframe::M3)
    }

    fn klines(n: usize) -> Vec<Kline> {
        (0..n as i64)
            .map(|i| Kline {
                open_time: i * 180_000,
                close_time: i * 180_000 + 179_999,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1.0,
                quote_volume: 100.0,
                taker_buy_base_volume: 0.5,
                taker_buy_quote_volume: 50.0,
                trades: 1,
            })
            .collect()
    }

    #[test]
    fn test_short_buffer_skips_engine() {
        let p = pipeline(1, 10);
        assert!(p.on_buffer_updated(&test_key(), &klines(19)).unwrap().is_none());
        assert_eq!(p.computations(), 0);
        assert!(p.features(&test_key().symbol).is_none());
    }

    #[test]
    fn test_threshold_buffer_computes_once() {
        let p = pipeline(0, 10);
        let output = p
            .on_buffer_updated(&test_key(), &klines(20))
            .unwrap()
            .unwrap();

        assert_eq!(p.computations(), 1);
        assert!(output.alerts.is_empty());
        assert_eq!(output.features.price, 119.0);
        assert_eq!(p.features(&test_key().symbol).unwrap().price, 119.0);
    }

    #[test]
    fn test_latest_features_overwrite() {
        let p = pipeline(0, 10);
        p.on_buffer_updated(&test_key(), &klines(20)).unwrap();
        p.on_buffer_updated(&test_key(), &klines(25)).unwrap();

        let all = p.all_features();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&test_key().symbol].price, 124.0);
    }

    #[tokio::test]
    async fn test_alerts_forwarded() {
        let p = pipeline(2, 10);
        let mut rx = p.take_alert_receiver().unwrap();
        assert!(p.take_alert_receiver().is_none());

        p.on_buffer_updated(&test_key(), &klines(20)).unwrap();

        assert_eq!(rx.recv().await.unwrap().message, "alert 0");
        assert_eq!(rx.recv().await.unwrap().message, "alert 1");
        assert_eq!(p.alerts_sent(), 2);
    }

    #[test]
    fn test_full_alert_channel_drops() {
        let p = pipeline(3, 2);
        let _rx = p.take_alert_receiver().unwrap();

        let output = p
            .on_buffer_updated(&test_key(), &klines(20))
            .unwrap()
            .unwrap();

        // All alerts are reported to the caller even when dropped.
        assert_eq!(output.alerts.len(), 3);
        assert_eq!(
            output.deliveries,
            vec![
                AlertDelivery::Sent,
                AlertDelivery::Sent,
                AlertDelivery::Dropped
            ]
        );
        assert_eq!(output.undelivered(), 1);
        assert_eq!(p.alerts_sent(), 2);
        assert_eq!(p.alerts_dropped(), 1);
    }

    #[test]
    fn test_engine_error_propagates() {
        let p = FeaturePipeline::new(
            Arc::new(StubEngine {
                alerts_per_call: 0,
                fail: true,
            }),
            PipelineConfig::default(),
        );
        assert!(matches!(
            p.on_buffer_updated(&test_key(), &klines(20)),
            Err(FeedError::Engine(_))
        ));
        assert!(p.all_features().is_empty());
    }

    #[tokio::test]
    async fn test_close_ends_alert_stream() {
        let p = pipeline(1, 10);
        let mut rx = p.take_alert_receiver().unwrap();
        p.on_buffer_updated(&test_key(), &klines(20)).unwrap();

        p.close();
        p.close();
        let output = p
            .on_buffer_updated(&test_key(), &klines(21))
            .unwrap()
            .unwrap();
        assert_eq!(output.deliveries, vec![AlertDelivery::Closed]);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
