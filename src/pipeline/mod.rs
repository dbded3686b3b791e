//! Ingestion Pipeline
//!
//! ## Per-reading stages
//!
//! ```text
//! Received → (Corrected) → Classified → Persisted → Broadcast → Done
//! ```
//!
//! Only the correction stage is optional. It runs when the developer mode
//! gate is inactive, assisted correction is enabled and the configured
//! [`CorrectionPolicy`] asks for it. A failed correction keeps the submitted
//! value and is never reported to the submitter.
//!
//! The submitter only ever sees [`IngestError::Validation`] (nothing
//! happened) or [`IngestError::Persistence`] (classified but discarded,
//! never broadcast).

mod stats;

pub use stats::{PipelineCounters, PipelineStats};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::classifier;
use crate::config::{AppConfig, CorrectionMode};
use crate::features;
use crate::mode_gate::ModeGate;
use crate::predictor::{PredictionError, PredictionRequest, SoilMoisturePredictor};
use crate::storage::{ReadingStore, StorageError};
use crate::types::{Classification, Reading, ReadingSubmission, SourceId};

// ============================================================================
// Errors and outcomes
// ============================================================================

/// Failures visible to the submitter.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid reading: {0}")]
    Validation(String),
    #[error("failed to persist reading: {0}")]
    Persistence(#[from] StorageError),
}

/// Why correction was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DeveloperMode,
    CorrectionDisabled,
    WithinPlausibleBand,
}

/// What the correction stage did to one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CorrectionOutcome {
    Skipped { reason: SkipReason },
    Applied { submitted: f64, corrected: f64 },
    Failed { submitted: f64, error: String },
}

impl CorrectionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// The reading as persisted, with its assigned id.
    pub reading: Reading,
    pub classification: Classification,
    pub correction: CorrectionOutcome,
}

// ============================================================================
// Settings
// ============================================================================

/// When correction is attempted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionPolicy {
    /// Every reading while correction is enabled.
    Always,
    /// Only readings with soil moisture outside `[min, max]`.
    OutOfBand { min: f64, max: f64 },
}

impl CorrectionPolicy {
    pub fn should_correct(&self, soil_moisture: f64) -> bool {
        match *self {
            Self::Always => true,
            Self::OutOfBand { min, max } => !(min..=max).contains(&soil_moisture),
        }
    }
}

/// Tunables of one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub policy: CorrectionPolicy,
    pub plant_profile: String,
    /// History loaded for the feature builder, ending at the reading's timestamp.
    pub history_window: chrono::Duration,
    /// Upper bound on one predictor call.
    pub prediction_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let c = &config.correction;
        let policy = match c.policy {
            CorrectionMode::Always => CorrectionPolicy::Always,
            CorrectionMode::OutOfBand => CorrectionPolicy::OutOfBand {
                min: c.plausible_min,
                max: c.plausible_max,
            },
        };
        Self {
            policy,
            plant_profile: config.predictor.plant_profile.clone(),
            history_window: c.history_window(),
            prediction_timeout: config.predictor.timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs the full per-reading pipeline. Shared across request handlers; many
/// ingestions may be in flight at once.
pub struct IngestionPipeline {
    store: Arc<dyn ReadingStore>,
    gate: Arc<ModeGate>,
    predictor: Arc<dyn SoilMoisturePredictor>,
    broadcaster: Arc<Broadcaster>,
    settings: PipelineSettings,
    counters: PipelineCounters,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        gate: Arc<ModeGate>,
        predictor: Arc<dyn SoilMoisturePredictor>,
        broadcaster: Arc<Broadcaster>,
        settings: PipelineSettings,
    ) -> Self {
        info!(
            store = store.backend_name(),
            predictor = predictor.name(),
            policy = ?settings.policy,
            "Ingestion pipeline ready"
        );
        Self {
            store,
            gate,
            predictor,
            broadcaster,
            settings,
            counters: PipelineCounters::default(),
        }
    }

    /// Ingest one submission from `source`, timestamped `now`.
    pub async fn ingest(
        &self,
        source: SourceId,
        submission: ReadingSubmission,
        now: DateTime<FixedOffset>,
    ) -> Result<IngestOutcome, IngestError> {
        // Received
        if let Err(msg) = submission.validate() {
            self.counters.record_rejected();
            debug!(source_id = %source, error = %msg, "Rejected invalid reading");
            return Err(IngestError::Validation(msg));
        }
        let mut reading = Reading::from_submission(source, now, &submission);

        // Corrected
        let correction = self.correct(&mut reading).await;

        // Classified
        let classification = classifier::classify(&reading);
        reading.is_abnormal = classification.is_abnormal;

        // Persisted
        let stored = match self.store.insert(&reading) {
            Ok(stored) => stored,
            Err(e) => {
                self.counters.record_persistence_failure();
                error!(source_id = %source, error = %e, "Failed to persist reading, not broadcasting");
                return Err(IngestError::Persistence(e));
            }
        };
        self.counters.record_accepted(stored.is_abnormal);

        // Broadcast
        self.broadcaster.broadcast_reading(&stored);
        if stored.is_abnormal {
            info!(
                reading_id = stored.id,
                source_id = %source,
                reason = %classification.reason,
                "Abnormal reading"
            );
            self.broadcaster.broadcast_abnormal_notification(&stored);
        }

        Ok(IngestOutcome {
            reading: stored,
            classification,
            correction,
        })
    }

    /// Current counter values.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Count a submission rejected before it reached [`Self::ingest`],
    /// such as a body that is not valid JSON.
    pub fn record_rejected(&self) {
        self.counters.record_rejected();
    }

    async fn correct(&self, reading: &mut Reading) -> CorrectionOutcome {
        let status = self.gate.status(reading.timestamp.with_timezone(&Utc));
        if status.active {
            return CorrectionOutcome::Skipped {
                reason: SkipReason::DeveloperMode,
            };
        }
        if !status.correction_enabled {
            return CorrectionOutcome::Skipped {
                reason: SkipReason::CorrectionDisabled,
            };
        }
        if !self.settings.policy.should_correct(reading.soil_moisture) {
            return CorrectionOutcome::Skipped {
                reason: SkipReason::WithinPlausibleBand,
            };
        }

        let submitted = reading.soil_moisture;
        match self.predict(reading).await {
            Ok(corrected) => {
                self.counters.record_correction(true);
                info!(
                    source_id = %reading.source_id,
                    submitted,
                    corrected,
                    "Soil moisture corrected"
                );
                reading.soil_moisture = corrected;
                CorrectionOutcome::Applied { submitted, corrected }
            }
            Err(e) => {
                self.counters.record_correction(false);
                warn!(
                    source_id = %reading.source_id,
                    predictor = self.predictor.name(),
                    error = %e,
                    "Soil moisture correction failed, keeping submitted value"
                );
                CorrectionOutcome::Failed {
                    submitted,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn predict(&self, reading: &Reading) -> Result<f64, PredictionError> {
        let until = reading.timestamp;
        let from = until - self.settings.history_window;
        let history = self
            .store
            .readings_between(reading.source_id, from, until)
            .unwrap_or_else(|e| {
                warn!(source_id = %reading.source_id, error = %e, "History query failed, using current values only");
                Vec::new()
            });

        let request = PredictionRequest {
            source_id: reading.source_id,
            plant_profile: self.settings.plant_profile.clone(),
            timestamp: reading.timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            features: features::build_features(&history, reading.temperature, reading.humidity),
        };

        let timeout = self.settings.prediction_timeout;
        match tokio::time::timeout(timeout, self.predictor.predict(&request)).await {
            Ok(result) => result,
            Err(_) => Err(PredictionError::Transport(format!(
                "prediction timed out after {}s",
                timeout.as_secs_f64()
            ))),
        }
    }
}
