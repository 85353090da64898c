//! Kline payload decoding.
//!
//! Stream payload format:
//! `{"e":"kline","E":..,"s":"BTCUSDT","k":{"t":..,"T":..,"i":"3m","o":"..",...}}`
//! Prices and volumes arrive as numeric strings.

use crate::error::{FeedError, FeedResult};
use klmon_core::{Kline, SeriesKey, Symbol, Timeframe};
use serde::Deserialize;

/// Raw kline event from the stream.
#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "V")]
    taker_buy_base_volume: String,
    #[serde(rename = "Q")]
    taker_buy_quote_volume: String,
    #[serde(rename = "n")]
    trades: u64,
    #[serde(rename = "x", default)]
    is_closed: bool,
}

/// Decoded kline update.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    pub key: SeriesKey,
    pub kline: Kline,
    /// Whether the exchange marked this candle final.
    pub is_closed: bool,
    pub event_time: i64,
}

/// Decode one stream payload into a validated kline.
pub fn decode_kline_event(data: &serde_json::Value) -> FeedResult<KlineEvent> {
    let raw = RawKlineEvent::deserialize(data).map_err(|e| FeedError::Decode(e.to_string()))?;
    if raw.event_type != "kline" {
        return Err(FeedError::Decode(format!(
            "unexpected event type {:?}",
            raw.event_type
        )));
    }

    let k = raw.kline;
    let symbol = Symbol::new(&k.symbol).map_err(|e| FeedError::Decode(e.to_string()))?;
    let timeframe = Timeframe::parse(&k.interval).map_err(|e| FeedError::Decode(e.to_string()))?;

    let kline = Kline {
        open_time: k.open_time,
        close_time: k.close_time,
        open: parse_num("o", &k.open)?,
        high: parse_num("h", &k.high)?,
        low: parse_num("l", &k.low)?,
        close: parse_num("c", &k.close)?,
        volume: parse_num("v", &k.volume)?,
        quote_volume: parse_num("q", &k.quote_volume)?,
        taker_buy_base_volume: parse_num("V", &k.taker_buy_base_volume)?,
        taker_buy_quote_volume: parse_num("Q", &k.taker_buy_quote_volume)?,
        trades: k.trades,
    };
    kline
        .validate()
        .map_err(|e| FeedError::Decode(e.to_string()))?;

    Ok(KlineEvent {
        key: SeriesKey::new(symbol, timeframe),
        kline,
        is_closed: k.is_closed,
        event_time: raw.event_time,
    })
}

fn parse_num(field: &str, value: &str) -> FeedResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| FeedError::Decode(format!("field {field}: not a number: {value:?}")))
}
