//! Monitor configuration.

use crate::error::{MonitorError, MonitorResult};
use klmon_core::{Symbol, Timeframe};
use klmon_feed::PipelineConfig;
use klmon_filter::FilterConfig;
use klmon_ws::{BatcherConfig, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Combined-stream endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// REST base URL for the catalog and backfill.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Explicit symbol universe. When absent, every trading USDT perpetual
    /// from the exchange catalog is monitored.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub pipeline: FeatureConfig,
    #[serde(default)]
    pub filter: FilterConfig,
}

fn default_ws_url() -> String {
    "wss://fstream.binance.com/stream".to_string()
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_timeframes() -> Vec<String> {
    vec!["3m".to_string(), "4h".to_string()]
}

/// WebSocket transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Fixed delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Reconnect when no frame arrives for this long (0 = disabled).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_messages_per_sec")]
    pub max_messages_per_sec: u32,
    /// Connection event channel depth.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_messages_per_sec() -> u32 {
    10
}

fn default_event_buffer() -> usize {
    16
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_messages_per_sec: default_max_messages_per_sec(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Subscription batching and fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between subscription batches.
    #[serde(default = "default_batch_pacing_ms")]
    pub batch_pacing_ms: u64,
    /// Per-stream subscriber channel depth.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_pacing_ms() -> u64 {
    100
}

fn default_subscriber_buffer() -> usize {
    100
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pacing_ms: default_batch_pacing_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// History buffers and backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Klines kept per series.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Klines fetched per series at startup.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,
    /// Concurrent REST fetches during backfill.
    #[serde(default = "default_backfill_concurrency")]
    pub backfill_concurrency: usize,
    /// Klines fetched for a series requested before it exists.
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,
}

fn default_capacity() -> usize {
    100
}

fn default_backfill_limit() -> usize {
    100
}

fn default_backfill_concurrency() -> usize {
    5
}

fn default_fallback_limit() -> usize {
    100
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            backfill_limit: default_backfill_limit(),
            backfill_concurrency: default_backfill_concurrency(),
            fallback_limit: default_fallback_limit(),
        }
    }
}

/// Feature pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Klines required before features are computed.
    #[serde(default = "default_min_klines")]
    pub min_klines: usize,
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
}

fn default_min_klines() -> usize {
    20
}

fn default_alert_capacity() -> usize {
    1000
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_klines: default_min_klines(),
            alert_capacity: default_alert_capacity(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            symbols: None,
            timeframes: default_timeframes(),
            websocket: WsConfig::default(),
            subscription: SubscriptionConfig::default(),
            history: HistoryConfig::default(),
            pipeline: FeatureConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `KLMON_CONFIG` or `config/default.toml`.
    pub fn load() -> MonitorResult<Self> {
        let config_path =
            std::env::var("KLMON_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MonitorError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> MonitorResult<Self> {
        toml::from_str(content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check every value the monitor depends on.
    pub fn validate(&self) -> MonitorResult<()> {
        self.resolved_timeframes()?;
        self.explicit_symbols()?;

        let positive = [
            ("subscription.batch_size", self.subscription.batch_size),
            ("subscription.subscriber_buffer", self.subscription.subscriber_buffer),
            ("history.capacity", self.history.capacity),
            ("history.backfill_concurrency", self.history.backfill_concurrency),
            ("pipeline.alert_capacity", self.pipeline.alert_capacity),
            ("websocket.event_buffer", self.websocket.event_buffer),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(MonitorError::Config(format!("{name} must be positive")));
        }
        if self.websocket.max_messages_per_sec == 0 {
            return Err(MonitorError::Config(
                "websocket.max_messages_per_sec must be positive".to_string(),
            ));
        }
        self.filter.validate()?;
        Ok(())
    }

    /// Configured timeframes, normalized and deduplicated in order.
    pub fn resolved_timeframes(&self) -> MonitorResult<Vec<Timeframe>> {
        if self.timeframes.is_empty() {
            return Err(MonitorError::Config(
                "at least one timeframe is required".to_string(),
            ));
        }
        let mut resolved = Vec::with_capacity(self.timeframes.len());
        for token in &self.timeframes {
            let timeframe = Timeframe::parse(token)?;
            if !resolved.contains(&timeframe) {
                resolved.push(timeframe);
            }
        }
        Ok(resolved)
    }

    /// Explicit universe, normalized and deduplicated in order.
    pub fn explicit_symbols(&self) -> MonitorResult<Option<Vec<Symbol>>> {
        let Some(symbols) = &self.symbols else {
            return Ok(None);
        };
        let mut resolved: Vec<Symbol> = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let symbol = Symbol::new(raw)?;
            if !resolved.contains(&symbol) {
                resolved.push(symbol);
            }
        }
        Ok(Some(resolved))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            handshake_timeout_ms: self.websocket.handshake_timeout_ms,
            reconnect_delay_ms: self.websocket.reconnect_delay_ms,
            idle_timeout_ms: self.websocket.idle_timeout_ms,
            max_messages_per_sec: self.websocket.max_messages_per_sec,
            ..Default::default()
        }
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.subscription.batch_size,
            pacing: Duration::from_millis(self.subscription.batch_pacing_ms),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            min_klines: self.pipeline.min_klines,
            alert_capacity: self.pipeline.alert_capacity,
        }
    }
}
