//! Activity score formula.
//!
//! | Component    | Weight | Condition                        | Saturates at          |
//! |--------------|--------|----------------------------------|-----------------------|
//! | Volume       | 40     | `volume_ratio5 > 1.5`            | ratio 5.0             |
//! | Volatility   | 30     | always                           | 1% 15-min move        |
//! | RSI extreme  | 20/10  | outside [30,70] / outside [40,60]| n/a                   |
//! | Volume trend | 10     | `volume_trend > 1.2`             | trend 3.0             |

use klmon_core::Features;

fn volume_component(volume_ratio5: f64) -> f64 {
    if volume_ratio5 > 1.5 {
        40.0 * (volume_ratio5 / 5.0).min(1.0)
    } else {
        0.0
    }
}

fn volatility_component(price_change_15min: f64) -> f64 {
    30.0 * (price_change_15min.abs() * 1000.0 / 10.0).min(1.0)
}

fn rsi_component(rsi: f64) -> f64 {
    if !(30.0..=70.0).contains(&rsi) {
        20.0
    } else if !(40.0..=60.0).contains(&rsi) {
        10.0
    } else {
        0.0
    }
}

fn trend_component(volume_trend: f64) -> f64 {
    if volume_trend > 1.2 {
        10.0 * (volume_trend / 3.0).min(1.0)
    } else {
        0.0
    }
}

/// Unsmoothed score in `[0, 100]`.
pub fn raw_score(features: &Features) -> f64 {
    volume_component(features.volume_ratio5)
        + volatility_component(features.price_change_15min)
        + rsi_component(features.rsi14)
        + trend_component(features.volume_trend)
}

/// Exponential smoothing: `(1 - alpha) * previous + alpha * raw`.
pub fn smooth(previous: f64, raw: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * previous + alpha * raw
}
