//! Sled-backed reading storage
//!
//! Persists classified readings for historical windows and abnormal counts.
//!
//! Key layout in the `readings` tree (24 bytes, big-endian):
//!
//! ```text
//! | source_id (8) | timestamp millis, sign bit flipped (8) | id (8) |
//! ```
//!
//! so a range scan over one source prefix yields that source's readings in
//! time order. The `abnormal_counts` tree maps each source id (8 bytes,
//! big-endian) to its running abnormal total, updated in the same
//! transaction as the reading itself. The `mode_gate` tree holds the single
//! persisted gate record.

use chrono::{DateTime, FixedOffset};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use std::sync::Arc;

use super::persistence::{GateStore, ReadingStore, StorageError};
use crate::mode_gate::GateRecord;
use crate::types::{Reading, SourceId};

const READINGS_TREE: &str = "readings";
const ABNORMAL_COUNTS_TREE: &str = "abnormal_counts";
const GATE_TREE: &str = "mode_gate";
const GATE_KEY: &[u8] = b"state";

/// Durable store for readings and the gate record.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    readings: sled::Tree,
    abnormal_counts: sled::Tree,
    gate: sled::Tree,
}

fn decode_count(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes).map_or(0, u64::from_be_bytes)
}

fn transaction_error(err: TransactionError<()>) -> StorageError {
    match err {
        TransactionError::Storage(e) => StorageError::from(e),
        TransactionError::Abort(()) => StorageError::Database("transaction aborted".to_string()),
    }
}

impl SledStore {
    /// Open or create the store at the specified directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let readings = db.open_tree(READINGS_TREE)?;
        let abnormal_counts = db.open_tree(ABNORMAL_COUNTS_TREE)?;
        let gate = db.open_tree(GATE_TREE)?;

        tracing::info!(path = %path_ref.display(), readings = readings.len(), "Reading storage opened");

        let store = Self {
            db: Arc::new(db),
            readings,
            abnormal_counts,
            gate,
        };
        if store.abnormal_counts.is_empty() && !store.readings.is_empty() {
            store.rebuild_abnormal_counts()?;
        }
        Ok(store)
    }

    /// Recount abnormal readings per source from the `readings` tree.
    fn rebuild_abnormal_counts(&self) -> Result<(), StorageError> {
        let mut counts: std::collections::BTreeMap<u64, u64> = std::collections::BTreeMap::new();
        for item in self.readings.iter() {
            let (_key, value) = item?;
            if let Ok(reading) = serde_json::from_slice::<Reading>(&value) {
                if reading.is_abnormal {
                    *counts.entry(reading.source_id.0).or_default() += 1;
                }
            }
        }

        for (source, count) in &counts {
            self.abnormal_counts
                .insert(source.to_be_bytes(), &count.to_be_bytes()[..])?;
        }
        tracing::info!(sources = counts.len(), "Rebuilt abnormal counts");
        Ok(())
    }

    fn timestamp_key(ts: DateTime<FixedOffset>) -> [u8; 8] {
        // Flipping the sign bit makes negative millis sort before positive ones
        ((ts.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
    }

    fn key(source: SourceId, ts: DateTime<FixedOffset>, id: u64) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..8].copy_from_slice(&source.to_be_bytes());
        key[8..16].copy_from_slice(&Self::timestamp_key(ts));
        key[16..].copy_from_slice(&id.to_be_bytes());
        key
    }
}

impl ReadingStore for SledStore {
    fn insert(&self, reading: &Reading) -> Result<Reading, StorageError> {
        let mut stored = reading.clone();
        // generate_id starts at 0; keep 0 as "unassigned"
        stored.id = self.db.generate_id()? + 1;

        let key = Self::key(stored.source_id, stored.timestamp, stored.id).to_vec();
        let value = serde_json::to_vec(&stored)?;
        let source_key = stored.source_id.to_be_bytes().to_vec();

        (&self.readings, &self.abnormal_counts)
            .transaction(|(readings, counts)| {
                readings.insert(key.clone(), value.clone())?;
                if stored.is_abnormal {
                    let current = counts.get(&source_key)?.map_or(0, |v| decode_count(&v));
                    counts.insert(source_key.clone(), (current + 1).to_be_bytes().to_vec())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)?;

        tracing::debug!(
            reading_id = stored.id,
            source_id = %stored.source_id,
            abnormal = stored.is_abnormal,
            "Stored reading"
        );

        Ok(stored)
    }

    fn readings_between(
        &self,
        source: SourceId,
        from: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> Result<Vec<Reading>, StorageError> {
        if until <= from {
            return Ok(Vec::new());
        }

        let start = Self::key(source, from, 0);
        let end = Self::key(source, until, 0);

        let mut window = Vec::new();
        for item in self.readings.range(start..end) {
            let (_key, value) = item?;
            match serde_json::from_slice::<Reading>(&value) {
                Ok(reading) => window.push(reading),
                Err(e) => {
                    tracing::warn!(source_id = %source, error = %e, "Skipping undecodable reading");
                }
            }
        }

        Ok(window)
    }

    fn abnormal_count(&self, source: SourceId) -> Result<u64, StorageError> {
        Ok(self
            .abnormal_counts
            .get(source.to_be_bytes())?
            .map_or(0, |v| decode_count(&v)))
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

impl GateStore for SledStore {
    fn save_gate(&self, record: &GateRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        self.gate.insert(GATE_KEY, value)?;
        self.gate.flush()?;
        Ok(())
    }

    fn load_gate(&self) -> Result<Option<GateRecord>, StorageError> {
        match self.gate.get(GATE_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn make_reading(source: u64, ts: DateTime<FixedOffset>, abnormal: bool) -> Reading {
        Reading {
            id: 0,
            source_id: SourceId(source),
            timestamp: ts,
            temperature: 25.0,
            humidity: 50.0,
            soil_moisture: if abnormal { 2.0 } else { 40.0 },
            is_abnormal: abnormal,
        }
    }

    #[test]
    fn test_storage_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        assert!(store.readings.is_empty());
        assert_eq!(store.backend_name(), "Sled");
    }

    #[test]
    fn test_insert_and_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let now = tz().with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        // Inserted out of order; includes one outside the window and one at `now`
        store.insert(&make_reading(1, now - Duration::hours(2), false)).unwrap();
        store.insert(&make_reading(1, now - Duration::hours(25), false)).unwrap();
        store.insert(&make_reading(1, now - Duration::hours(5), false)).unwrap();
        store.insert(&make_reading(1, now, false)).unwrap();
        store.insert(&make_reading(2, now - Duration::hours(1), false)).unwrap();

        let window = store
            .readings_between(SourceId(1), now - Duration::hours(24), now)
            .unwrap();

        assert_eq!(window.len(), 2);
        assert_eq!(window[0].timestamp, now - Duration::hours(5));
        assert_eq!(window[1].timestamp, now - Duration::hours(2));
        assert!(window.iter().all(|r| r.source_id == SourceId(1)));
    }

    #[test]
    fn test_ids_are_unique_for_identical_timestamps() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let ts = tz().with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        let a = store.insert(&make_reading(1, ts, false)).unwrap();
        let b = store.insert(&make_reading(1, ts, false)).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.readings.len(), 2);
    }

    #[test]
    fn test_abnormal_count() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let ts = tz().with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        store.insert(&make_reading(1, ts, true)).unwrap();
        store.insert(&make_reading(1, ts + Duration::minutes(1), true)).unwrap();
        store.insert(&make_reading(1, ts + Duration::minutes(2), false)).unwrap();
        store.insert(&make_reading(2, ts, true)).unwrap();

        assert_eq!(store.abnormal_count(SourceId(1)).unwrap(), 2);
        assert_eq!(store.abnormal_count(SourceId(2)).unwrap(), 1);
        assert_eq!(store.abnormal_count(SourceId(3)).unwrap(), 0);
    }

    #[test]
    fn test_abnormal_count_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ts = tz().with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        {
            let store = SledStore::open(temp_dir.path()).unwrap();
            store.insert(&make_reading(4, ts, true)).unwrap();
            store.insert(&make_reading(4, ts + Duration::minutes(1), true)).unwrap();
        }

        let store = SledStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.abnormal_count(SourceId(4)).unwrap(), 2);
        store.insert(&make_reading(4, ts + Duration::minutes(2), true)).unwrap();
        assert_eq!(store.abnormal_count(SourceId(4)).unwrap(), 3);
    }

    #[test]
    fn test_missing_counts_are_rebuilt_on_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ts = tz().with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        {
            let store = SledStore::open(temp_dir.path()).unwrap();
            store.insert(&make_reading(5, ts, true)).unwrap();
            store.insert(&make_reading(5, ts + Duration::minutes(1), false)).unwrap();
            store.insert(&make_reading(6, ts, true)).unwrap();
            store.abnormal_counts.clear().unwrap();
        }

        let store = SledStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.abnormal_count(SourceId(5)).unwrap(), 1);
        assert_eq!(store.abnormal_count(SourceId(6)).unwrap(), 1);
    }

    #[test]
    fn test_gate_record_round_trip_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let record = GateRecord {
            enabled: true,
            activated_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            correction_enabled: false,
        };

        {
            let store = SledStore::open(temp_dir.path()).unwrap();
            assert!(store.load_gate().unwrap().is_none());
            store.save_gate(&record).unwrap();
        }

        let store = SledStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load_gate().unwrap(), Some(record));
    }
}
