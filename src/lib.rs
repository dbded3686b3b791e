//! AgroSense: environmental telemetry ingestion
//!
//! Ingests temperature, humidity and soil-moisture readings from field
//! devices, corrects implausible soil-moisture values with an external
//! predictor, classifies readings as normal or abnormal, persists them and
//! fans them out to live observers.
//!
//! ## Architecture
//!
//! - **Classifier**: fixed-band abnormality rules
//! - **Mode Gate**: time-bounded developer mode that suspends correction
//! - **Feature Builder + Predictor**: rolling/lag features sent to the model service
//! - **Ingestion Pipeline**: validate, correct, classify, persist, broadcast
//! - **Broadcaster**: live observer registry with per-observer notifications

pub mod api;
pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod features;
pub mod mode_gate;
pub mod pipeline;
pub mod predictor;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::AppConfig;

// Re-export commonly used types
pub use types::{AbnormalReason, Classification, Reading, ReadingSubmission, SourceId};

// Re-export core components
pub use broadcast::{Broadcaster, ObserverSink};
pub use mode_gate::{GateStatus, ModeGate};
pub use pipeline::{IngestError, IngestOutcome, IngestionPipeline, PipelineSettings};
pub use predictor::{HttpPredictor, PredictionError, SoilMoisturePredictor};
pub use storage::{InMemoryStore, ReadingStore, SledStore, StorageError};
