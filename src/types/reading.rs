//! Reading types

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical owner (device / account) that readings and observers are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl SourceId {
    /// Big-endian key prefix used by ordered stores.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SourceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(SourceId)
    }
}

/// Payload submitted by a sensing device.
///
/// Identity and timestamp are never taken from the payload: the source is
/// attributed by the transport and the timestamp is assigned server-side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingSubmission {
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Volumetric soil moisture (%)
    pub soil_moisture: f64,
}

impl ReadingSubmission {
    /// Reject payloads that cannot be processed at all.
    ///
    /// Out-of-band values are NOT rejected here; they are the classifier's
    /// and the correction step's concern.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("soil_moisture", self.soil_moisture),
        ] {
            if !value.is_finite() {
                errors.push(format!("{name} must be a finite number (got {value})"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

/// One timestamped environmental measurement from a source device.
///
/// Immutable once classified and persisted. `id` is zero until the store
/// assigns one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    #[serde(rename = "user_id")]
    pub source_id: SourceId,
    pub timestamp: DateTime<FixedOffset>,
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub is_abnormal: bool,
}

impl Reading {
    /// Build an unclassified, unpersisted reading from a device submission.
    pub fn from_submission(
        source_id: SourceId,
        timestamp: DateTime<FixedOffset>,
        submission: &ReadingSubmission,
    ) -> Self {
        Self {
            id: 0,
            source_id,
            timestamp,
            temperature: submission.temperature,
            humidity: submission.humidity,
            soil_moisture: submission.soil_moisture,
            is_abnormal: false,
        }
    }
}

/// Which band a reading violated, in classifier priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AbnormalReason {
    Temperature,
    Humidity,
    #[serde(rename = "Soil Moisture")]
    SoilMoisture,
    #[default]
    None,
}

impl AbnormalReason {
    /// Human-readable label used in notifications.
    pub fn label(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::SoilMoisture => "Soil Moisture",
            Self::None => "None",
        }
    }
}

impl fmt::Display for AbnormalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifier verdict for a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_abnormal: bool,
    pub reason: AbnormalReason,
}

impl Classification {
    pub const NORMAL: Self = Self {
        is_abnormal: false,
        reason: AbnormalReason::None,
    };

    pub fn abnormal(reason: AbnormalReason) -> Self {
        Self {
            is_abnormal: true,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_source_id_parse() {
        assert_eq!(" 42 ".parse::<SourceId>().unwrap(), SourceId(42));
        assert!("abc".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_submission_rejects_non_finite() {
        let bad = ReadingSubmission {
            temperature: f64::NAN,
            humidity: 40.0,
            soil_moisture: f64::INFINITY,
        };
        let err = bad.validate().unwrap_err();
        assert!(err.contains("temperature"));
        assert!(err.contains("soil_moisture"));
        assert!(!err.contains("humidity"));
    }

    #[test]
    fn test_reason_serializes_as_label() {
        for reason in [
            AbnormalReason::Temperature,
            AbnormalReason::Humidity,
            AbnormalReason::SoilMoisture,
            AbnormalReason::None,
        ] {
            assert_eq!(serde_json::to_value(reason).unwrap(), reason.label());
        }
        let parsed: AbnormalReason = serde_json::from_str("\"Soil Moisture\"").unwrap();
        assert_eq!(parsed, AbnormalReason::SoilMoisture);
    }

    #[test]
    fn test_submission_accepts_out_of_band_values() {
        let sub = ReadingSubmission {
            temperature: 70.0,
            humidity: 5.0,
            soil_moisture: 2.0,
        };
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_reading_serializes_source_as_user_id() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let ts = tz.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let reading = Reading::from_submission(
            SourceId(7),
            ts,
            &ReadingSubmission {
                temperature: 25.0,
                humidity: 40.0,
                soil_moisture: 30.0,
            },
        );
        let v = serde_json::to_value(&reading).unwrap();
        assert_eq!(v["user_id"], 7);
        assert_eq!(v["is_abnormal"], false);
        assert_eq!(v["timestamp"], "2025-03-01T12:00:00+08:00");
    }
}
