//! Candlestick, feature snapshot and alert types.

use crate::error::{CoreError, Result};
use crate::market::Symbol;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candlestick.
///
/// Identity within a series is `open_time`. Times are milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub trades: u64,
}

impl Kline {
    /// Check the structural invariants of a candlestick.
    ///
    /// `close_time > open_time`, OHLC strictly positive and finite,
    /// volumes non-negative and finite.
    pub fn validate(&self) -> Result<()> {
        if self.close_time <= self.open_time {
            return Err(CoreError::InvalidKline(format!(
                "close_time {} not after open_time {}",
                self.close_time, self.open_time
            )));
        }

        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::InvalidKline(format!("{name} must be positive, got {value}")));
            }
        }

        for (name, value) in [
            ("volume", self.volume),
            ("quote_volume", self.quote_volume),
            ("taker_buy_base_volume", self.taker_buy_base_volume),
            ("taker_buy_quote_volume", self.taker_buy_quote_volume),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidKline(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        Ok(())
    }
}

/// Latest derived indicators for a symbol.
///
/// Produced by the feature engine; the monitor only stores and scores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub symbol: Symbol,
    /// Series the snapshot was computed from.
    pub timeframe: Timeframe,
    /// Close time of the newest kline in the input window.
    pub close_time: i64,
    pub price: f64,
    pub rsi14: f64,
    /// Last volume relative to the mean of the previous five.
    pub volume_ratio5: f64,
    pub volume_trend: f64,
    /// Fractional price change over the trailing 15 minutes.
    pub price_change_15min: f64,
    pub volatility: f64,
    pub computed_at: DateTime<Utc>,
}

/// Alert raised by the feature engine.
///
/// Opaque to the monitor; routed and counted, never inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: Symbol,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(symbol: Symbol, alert_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            symbol,
            alert_type: alert_type.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kline() -> Kline {
        Kline {
            open_time: 1_700_000_000_000,
            close_time: 1_700_000_179_999,
            open: 100.0,
            high: 101.5,
            low: 99.5,
            close: 100.8,
            volume: 12.5,
            quote_volume: 1_260.0,
            taker_buy_base_volume: 6.0,
            taker_buy_quote_volume: 604.0,
            trades: 42,
        }
    }

    #[test]
    fn test_valid_kline() {
        assert!(sample_kline().validate().is_ok());
    }

    #[test]
    fn test_close_time_must_follow_open_time() {
        let mut kline = sample_kline();
        kline.close_time = kline.open_time;
        assert!(matches!(kline.validate(), Err(CoreError::InvalidKline(_))));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let mut kline = sample_kline();
        kline.low = 0.0;
        assert!(kline.validate().is_err());

        let mut kline = sample_kline();
        kline.close = f64::NAN;
        assert!(kline.validate().is_err());
    }

    #[test]
    fn test_zero_volume_allowed_negative_rejected() {
        let mut kline = sample_kline();
        kline.volume = 0.0;
        kline.trades = 0;
        assert!(kline.validate().is_ok());

        kline.quote_volume = -1.0;
        assert!(kline.validate().is_err());
    }

    #[test]
    fn test_alert_serializes_type_field() {
        let alert = Alert::new(Symbol::new("BTCUSDT").unwrap(), "volume_spike", "5x volume");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "volume_spike");
        assert_eq!(json["symbol"], "BTCUSDT");
    }
}
