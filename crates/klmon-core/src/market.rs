//! Market identification types.
//!
//! A series is identified by `(symbol, timeframe)`. On the wire the same
//! pair is encoded as a stream identifier `<symbol lowercase>@kline_<tf>`.

use crate::error::{CoreError, Result};
use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Instrument symbol (e.g., BTCUSDT).
///
/// Always upper-case ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Validate and normalize a raw symbol.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key of one kline series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self { symbol, timeframe }
    }

    /// Stream identifier carrying this series on the wire.
    pub fn stream_id(&self) -> StreamId {
        StreamId::kline(&self.symbol, self.timeframe)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

/// Wire-level stream identifier, e.g. `btcusdt@kline_3m`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    const KLINE_MARKER: &'static str = "@kline_";

    /// Build the kline stream identifier for a series.
    pub fn kline(symbol: &Symbol, timeframe: Timeframe) -> Self {
        Self(format!(
            "{}{}{}",
            symbol.as_str().to_ascii_lowercase(),
            Self::KLINE_MARKER,
            timeframe.as_str()
        ))
    }

    /// Wrap an identifier received from the wire without validation.
    ///
    /// Routing compares identifiers verbatim; use [`StreamId::parse`] to
    /// recover the series.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Recover the series a kline stream identifier refers to.
    pub fn parse(&self) -> Result<SeriesKey> {
        let (symbol, timeframe) = self
            .0
            .split_once(Self::KLINE_MARKER)
            .ok_or_else(|| CoreError::InvalidStreamId(self.0.clone()))?;
        let symbol = Symbol::new(symbol).map_err(|_| CoreError::InvalidStreamId(self.0.clone()))?;
        let timeframe =
            Timeframe::parse(timeframe).map_err(|_| CoreError::InvalidStreamId(self.0.clone()))?;
        Ok(SeriesKey::new(symbol, timeframe))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StreamId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&SeriesKey> for StreamId {
    fn from(key: &SeriesKey) -> Self {
        key.stream_id()
    }
}
