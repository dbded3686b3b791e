//! Ingestion counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by concurrent ingestions.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    readings_accepted: AtomicU64,
    readings_rejected: AtomicU64,
    abnormal_readings: AtomicU64,
    corrections_applied: AtomicU64,
    corrections_failed: AtomicU64,
    persistence_failures: AtomicU64,
}

impl PipelineCounters {
    pub fn record_accepted(&self, abnormal: bool) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
        if abnormal {
            self.abnormal_readings.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.readings_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_correction(&self, applied: bool) {
        if applied {
            self.corrections_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.corrections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A persistence failure also counts as a rejection.
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        self.readings_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            abnormal_readings: self.abnormal_readings.load(Ordering::Relaxed),
            corrections_applied: self.corrections_applied.load(Ordering::Relaxed),
            corrections_failed: self.corrections_failed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pipeline statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStats {
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub abnormal_readings: u64,
    pub corrections_applied: u64,
    pub corrections_failed: u64,
    pub persistence_failures: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} accepted ({} abnormal), {} rejected, corrections {} applied / {} failed",
            self.readings_accepted,
            self.abnormal_readings,
            self.readings_rejected,
            self.corrections_applied,
            self.corrections_failed
        )
    }
}
