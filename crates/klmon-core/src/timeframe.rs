//! Timeframe registry.
//!
//! A fixed mapping from interval token to duration. Tokens are matched
//! exactly after trimming and lower-casing; there is no fuzzy resolution
//! because subscription batches and history keys are built from the
//! canonical token.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported kline interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
}

impl Timeframe {
    /// Every supported timeframe, shortest first.
    pub const ALL: [Timeframe; 11] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H12,
        Self::D1,
    ];

    /// Parse a timeframe token.
    ///
    /// The token is trimmed and lower-cased, then matched exactly against
    /// the supported set. Anything else is `CoreError::InvalidTimeframe`.
    pub fn parse(token: &str) -> Result<Self> {
        let normalized = token.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == normalized)
            .ok_or_else(|| CoreError::InvalidTimeframe(token.to_string()))
    }

    /// Canonical token, as used in stream identifiers and REST requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H12 => "12h",
            Self::D1 => "1d",
        }
    }

    /// Bucket length of one kline.
    pub fn duration(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        let secs = match self {
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => 24 * HOUR,
        };
        Duration::from_secs(secs)
    }

    /// Bucket length in milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.duration().as_millis() as i64
    }
}

/// Normalize a timeframe token to its canonical form.
pub fn normalize(token: &str) -> Result<&'static str> {
    Timeframe::parse(token).map(|tf| tf.as_str())
}

/// Look up the bucket duration of a timeframe token.
pub fn duration(token: &str) -> Result<Duration> {
    Timeframe::parse(token).map(|tf| tf.duration())
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}
