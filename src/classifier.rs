//! Abnormality classifier
//!
//! Flags a reading as abnormal when any channel leaves its acceptable band.
//! Bands are checked in a fixed priority order and the first violation wins:
//!
//! | Priority | Channel       | Acceptable band |
//! |----------|---------------|-----------------|
//! | 1        | temperature   | [20, 50] °C     |
//! | 2        | humidity      | [30, 90] %      |
//! | 3        | soil moisture | [5, 95] %       |
//!
//! Band edges are inclusive.

use crate::types::{AbnormalReason, Classification, Reading};

/// Inclusive acceptable band for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const TEMPERATURE_BAND: Band = Band::new(20.0, 50.0);
pub const HUMIDITY_BAND: Band = Band::new(30.0, 90.0);
pub const SOIL_MOISTURE_BAND: Band = Band::new(5.0, 95.0);

/// Classify a reading.
pub fn classify(reading: &Reading) -> Classification {
    classify_values(reading.temperature, reading.humidity, reading.soil_moisture)
}

/// Classify raw channel values.
pub fn classify_values(temperature: f64, humidity: f64, soil_moisture: f64) -> Classification {
    if !TEMPERATURE_BAND.contains(temperature) {
        Classification::abnormal(AbnormalReason::Temperature)
    } else if !HUMIDITY_BAND.contains(humidity) {
        Classification::abnormal(AbnormalReason::Humidity)
    } else if !SOIL_MOISTURE_BAND.contains(soil_moisture) {
        Classification::abnormal(AbnormalReason::SoilMoisture)
    } else {
        Classification::NORMAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_in_band_is_normal() {
        for t in [20.0, 35.0, 50.0] {
            for h in [30.0, 60.0, 90.0] {
                for s in [5.0, 50.0, 95.0] {
                    assert_eq!(classify_values(t, h, s), Classification::NORMAL, "t={t} h={h} s={s}");
                }
            }
        }
    }

    #[test]
    fn test_single_channel_out_of_band() {
        assert_eq!(
            classify_values(19.9, 60.0, 50.0).reason,
            AbnormalReason::Temperature
        );
        assert_eq!(
            classify_values(50.1, 60.0, 50.0).reason,
            AbnormalReason::Temperature
        );
        assert_eq!(classify_values(25.0, 29.0, 50.0).reason, AbnormalReason::Humidity);
        assert_eq!(classify_values(25.0, 91.0, 50.0).reason, AbnormalReason::Humidity);
        assert_eq!(
            classify_values(25.0, 40.0, 2.0).reason,
            AbnormalReason::SoilMoisture
        );
        assert!(classify_values(25.0, 40.0, 96.0).is_abnormal);
    }

    #[test]
    fn test_priority_order() {
        // Everything out of band: temperature wins
        assert_eq!(classify_values(0.0, 0.0, 0.0).reason, AbnormalReason::Temperature);
        // Humidity beats soil moisture
        assert_eq!(classify_values(25.0, 95.0, 99.0).reason, AbnormalReason::Humidity);
    }

    #[test]
    fn test_nan_is_abnormal() {
        assert!(classify_values(f64::NAN, 40.0, 50.0).is_abnormal);
    }
}
