//! Storage traits: pluggable backends for readings and gate state
//!
//! The pipeline and broadcaster only see these traits, so backends can be
//! swapped without touching pipeline code:
//! - `SledStore`: durable embedded store used by the service
//! - `InMemoryStore`: in-memory store for testing and minimal deployments

use chrono::{DateTime, FixedOffset};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::mode_gate::GateRecord;
use crate::types::{Reading, SourceId};

/// Durable storage for classified readings.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across request handlers.
pub trait ReadingStore: Send + Sync {
    /// Persist a classified reading, returning it with its assigned id.
    fn insert(&self, reading: &Reading) -> Result<Reading, StorageError>;

    /// All readings for `source` with `from <= timestamp < until`, oldest first.
    fn readings_between(
        &self,
        source: SourceId,
        from: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> Result<Vec<Reading>, StorageError>;

    /// Cumulative number of abnormal readings persisted for `source`.
    fn abnormal_count(&self, source: SourceId) -> Result<u64, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Durable home of the mode gate's last transition.
pub trait GateStore: Send + Sync {
    fn save_gate(&self, record: &GateRecord) -> Result<(), StorageError>;

    fn load_gate(&self) -> Result<Option<GateRecord>, StorageError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// In-memory persistence for testing and minimal deployments
///
/// Thread-safe via `RwLock`. Not durable; data is lost on restart.
pub struct InMemoryStore {
    readings: RwLock<Vec<Reading>>,
    gate: RwLock<Option<GateRecord>>,
    next_id: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            readings: RwLock::new(Vec::new()),
            gate: RwLock::new(None),
            next_id: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate a storage outage: every write fails while set.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of persisted readings.
    pub fn len(&self) -> usize {
        self.readings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every persisted reading, in insertion order.
    pub fn all(&self) -> Vec<Reading> {
        self.readings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingStore for InMemoryStore {
    fn insert(&self, reading: &Reading) -> Result<Reading, StorageError> {
        self.check_writable()?;

        let mut stored = reading.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.readings
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .push(stored.clone());

        Ok(stored)
    }

    fn readings_between(
        &self,
        source: SourceId,
        from: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> Result<Vec<Reading>, StorageError> {
        let store = self
            .readings
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut window: Vec<Reading> = store
            .iter()
            .filter(|r| r.source_id == source && r.timestamp >= from && r.timestamp < until)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        window.sort_by_key(|r| r.timestamp);
        Ok(window)
    }

    fn abnormal_count(&self, source: SourceId) -> Result<u64, StorageError> {
        let store = self
            .readings
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(store
            .iter()
            .filter(|r| r.source_id == source && r.is_abnormal)
            .count() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

impl GateStore for InMemoryStore {
    fn save_gate(&self, record: &GateRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        *self
            .gate
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))? = Some(record.clone());
        Ok(())
    }

    fn load_gate(&self) -> Result<Option<GateRecord>, StorageError> {
        Ok(self
            .gate
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn make_reading(source: u64, minute: u32, abnormal: bool) -> Reading {
        Reading {
            id: 0,
            source_id: SourceId(source),
            timestamp: tz().with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            temperature: 25.0,
            humidity: 50.0,
            soil_moisture: 40.0,
            is_abnormal: abnormal,
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let a = store.insert(&make_reading(1, 0, false)).unwrap();
        let b = store.insert(&make_reading(1, 1, false)).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_window_is_half_open_and_sorted() {
        let store = InMemoryStore::new();
        store.insert(&make_reading(1, 30, false)).unwrap();
        store.insert(&make_reading(1, 10, false)).unwrap();
        store.insert(&make_reading(1, 20, false)).unwrap();
        store.insert(&make_reading(2, 15, false)).unwrap();

        let from = tz().with_ymd_and_hms(2025, 3, 1, 10, 10, 0).unwrap();
        let until = from + Duration::minutes(20);
        let window = store.readings_between(SourceId(1), from, until).unwrap();

        let minutes: Vec<_> = window
            .iter()
            .map(|r| r.timestamp.format("%M").to_string())
            .collect();
        assert_eq!(minutes, vec!["10", "20"]);
    }

    #[test]
    fn test_abnormal_count_is_scoped_to_source() {
        let store = InMemoryStore::new();
        store.insert(&make_reading(1, 0, true)).unwrap();
        store.insert(&make_reading(1, 1, true)).unwrap();
        store.insert(&make_reading(1, 2, false)).unwrap();
        store.insert(&make_reading(2, 0, true)).unwrap();

        assert_eq!(store.abnormal_count(SourceId(1)).unwrap(), 2);
        assert_eq!(store.abnormal_count(SourceId(2)).unwrap(), 1);
        assert_eq!(store.abnormal_count(SourceId(3)).unwrap(), 0);
    }

    #[test]
    fn test_simulated_outage() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.insert(&make_reading(1, 0, false)),
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.is_empty());

        store.set_fail_writes(false);
        assert!(store.insert(&make_reading(1, 0, false)).is_ok());
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn ReadingStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
    }
}
