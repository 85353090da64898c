//! Filter configuration.

use crate::error::{FilterError, FilterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for adaptive scoring and eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Weight of the newest raw score in the smoothed score.
    pub smoothing_alpha: f64,
    /// Smoothed scores below this are evicted.
    pub score_floor: f64,
    /// Evict after this long without a feature computation.
    pub inactivity_timeout_secs: u64,
    /// Evict alerting symbols quiet for this long.
    pub alert_staleness_secs: u64,
    pub eviction_interval_secs: u64,
    pub ranking_interval_secs: u64,
    /// Size of the published ranking.
    pub top_n: usize,
    /// `volume_ratio5` above which a volume spike is counted.
    pub volume_spike_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.3,
            score_floor: 15.0,
            inactivity_timeout_secs: 30 * 60,
            alert_staleness_secs: 2 * 60 * 60,
            eviction_interval_secs: 5 * 60,
            ranking_interval_secs: 2 * 60,
            top_n: 20,
            volume_spike_ratio: 2.0,
        }
    }
}

impl FilterConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> FilterResult<()> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(FilterError::InvalidConfig(format!(
                "smoothing_alpha ({}) must be in (0, 1]",
                self.smoothing_alpha
            )));
        }
        if !self.score_floor.is_finite() || self.score_floor < 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "score_floor ({}) must be non-negative",
                self.score_floor
            )));
        }
        if self.inactivity_timeout_secs == 0 || self.alert_staleness_secs == 0 {
            return Err(FilterError::InvalidConfig(
                "inactivity_timeout_secs and alert_staleness_secs must be positive".to_string(),
            ));
        }
        if self.eviction_interval_secs == 0 || self.ranking_interval_secs == 0 {
            return Err(FilterError::InvalidConfig(
                "maintenance intervals must be positive".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(FilterError::InvalidConfig("top_n must be positive".to_string()));
        }
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inactivity_timeout_secs as i64)
    }

    pub fn alert_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_staleness_secs as i64)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn ranking_interval(&self) -> Duration {
        Duration::from_secs(self.ranking_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inactivity_timeout(), chrono::Duration::minutes(30));
        assert_eq!(config.alert_staleness(), chrono::Duration::hours(2));
        assert_eq!(config.ranking_interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_alpha() {
        for alpha in [0.0, -0.1, 1.5, f64::NAN] {
            let config = FilterConfig {
                smoothing_alpha: alpha,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "alpha {alpha} accepted");
        }
    }

    #[test]
    fn test_invalid_top_n() {
        let config = FilterConfig {
            top_n: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FilterError::InvalidConfig(_))
        ));
    }
}
