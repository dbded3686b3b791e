//! Shared data structures for the telemetry ingestion pipeline
//!
//! This module defines the core types passed between pipeline stages:
//! - Received: `ReadingSubmission` (device payload) attributed to a `SourceId`
//! - Classified: `Classification` with its `AbnormalReason`
//! - Persisted / broadcast: `Reading`

mod reading;

pub use reading::*;
