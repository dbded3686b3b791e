//! Feature engineering for the soil-moisture predictor
//!
//! Builds short/long rolling averages and a one-step lag for temperature and
//! humidity from a source's recent history. Readings are assumed to arrive
//! roughly hourly, so the 3-element and 24-element windows approximate
//! 3-hour and 24-hour averages.

use serde::Serialize;

use crate::types::Reading;

/// Short rolling window (elements).
pub const SHORT_WINDOW: usize = 3;

/// Long rolling window (elements).
pub const LONG_WINDOW: usize = 24;

/// Engineered features for one prediction. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub temperature: f64,
    pub humidity: f64,
    pub temp_rolling_3: f64,
    pub humidity_rolling_3: f64,
    pub temp_rolling_24: f64,
    pub humidity_rolling_24: f64,
    pub temp_lag_1: f64,
    pub humidity_lag_1: f64,
}

impl FeatureVector {
    /// Features when no history is available: everything falls back to the
    /// current reading's own values.
    pub fn from_current(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
            temp_rolling_3: temperature,
            humidity_rolling_3: humidity,
            temp_rolling_24: temperature,
            humidity_rolling_24: humidity,
            temp_lag_1: temperature,
            humidity_lag_1: humidity,
        }
    }
}

/// Mean of the last `n` values (all of them if fewer than `n`).
///
/// Returns 0.0 for an empty slice or `n == 0`.
pub fn rolling_average(values: &[f64], n: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(n)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Build the feature vector from `history` (one source, oldest first).
pub fn build_features(history: &[Reading], current_temperature: f64, current_humidity: f64) -> FeatureVector {
    let Some(last) = history.last() else {
        return FeatureVector::from_current(current_temperature, current_humidity);
    };

    let temps: Vec<f64> = history.iter().map(|r| r.temperature).collect();
    let humidities: Vec<f64> = history.iter().map(|r| r.humidity).collect();

    FeatureVector {
        temperature: current_temperature,
        humidity: current_humidity,
        temp_rolling_3: rolling_average(&temps, SHORT_WINDOW),
        humidity_rolling_3: rolling_average(&humidities, SHORT_WINDOW),
        temp_rolling_24: rolling_average(&temps, LONG_WINDOW),
        humidity_rolling_24: rolling_average(&humidities, LONG_WINDOW),
        temp_lag_1: last.temperature,
        humidity_lag_1: last.humidity,
    }
}
