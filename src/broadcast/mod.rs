//! Real-time broadcaster
//!
//! Owns the registry of live observers. Every accepted reading goes to every
//! observer; abnormal readings are followed by a per-observer notification
//! carrying that observer's own cumulative abnormal count.
//!
//! Observers are reached through [`ObserverSink`], a non-blocking handoff to
//! the connection's writer task. Sends never await, so the registry lock is
//! held across a whole broadcast and a concurrent deregister cannot
//! interleave with a send to the same observer.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier;
use crate::storage::ReadingStore;
use crate::types::{Reading, SourceId};

/// Message text of abnormal-reading notifications.
pub const ABNORMAL_MESSAGE: &str = "Abnormal data detected!";

/// Identity of one registered observer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A push to one observer failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserverSendError {
    #[error("observer connection closed")]
    Closed,
    #[error("observer send buffer full")]
    Full,
}

/// Non-blocking outbound half of an observer connection.
pub trait ObserverSink: Send + Sync {
    fn send(&self, payload: Arc<str>) -> Result<(), ObserverSendError>;
}

impl ObserverSink for mpsc::Sender<Arc<str>> {
    fn send(&self, payload: Arc<str>) -> Result<(), ObserverSendError> {
        self.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ObserverSendError::Full,
            mpsc::error::TrySendError::Closed(_) => ObserverSendError::Closed,
        })
    }
}

/// Enriched message sent to each observer after an abnormal reading.
#[derive(Debug, Serialize)]
pub struct AbnormalNotification<'a> {
    pub message: &'static str,
    pub data: &'a Reading,
    pub reason: &'static str,
    pub abnormal_count: u64,
}

struct Observer {
    sink: Arc<dyn ObserverSink>,
    source: SourceId,
}

/// Registry of live observers and fan-out of readings.
pub struct Broadcaster {
    observers: Mutex<HashMap<ObserverId, Observer>>,
    store: Arc<dyn ReadingStore>,
}

impl Broadcaster {
    /// `store` answers the per-observer abnormal count queries.
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Add an observer; it receives every broadcast that starts after this
    /// returns.
    pub fn register(&self, sink: Arc<dyn ObserverSink>, source: SourceId) -> ObserverId {
        let id = ObserverId::new();
        let mut observers = self.lock();
        observers.insert(id, Observer { sink, source });
        info!(observer_id = %id, source_id = %source, observers = observers.len(), "Observer registered");
        id
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn deregister(&self, id: ObserverId) -> bool {
        let mut observers = self.lock();
        let removed = observers.remove(&id).is_some();
        if removed {
            info!(observer_id = %id, observers = observers.len(), "Observer deregistered");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    /// Send the reading, serialized once, to every observer. Observers whose
    /// send fails are removed. Returns the number of successful deliveries.
    pub fn broadcast_reading(&self, reading: &Reading) -> usize {
        let payload: Arc<str> = match serde_json::to_string(reading) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(reading_id = reading.id, error = %e, "Failed to serialize reading for broadcast");
                return 0;
            }
        };

        let mut observers = self.lock();
        let mut failed = Vec::new();
        for (id, observer) in observers.iter() {
            if let Err(e) = observer.sink.send(Arc::clone(&payload)) {
                warn!(observer_id = %id, reading_id = reading.id, error = %e, "Observer send failed");
                failed.push(*id);
            }
        }

        let delivered = observers.len() - failed.len();
        Self::remove_failed(&mut observers, &failed);
        debug!(reading_id = reading.id, delivered, "Reading broadcast");
        delivered
    }

    /// Send each observer a notification with the abnormal count of its own
    /// source. An observer whose count query fails is skipped for this
    /// event; one whose send fails is removed. Returns the number of
    /// notifications delivered.
    pub fn broadcast_abnormal_notification(&self, reading: &Reading) -> usize {
        let reason = classifier::classify(reading).reason.label();

        let mut observers = self.lock();
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (id, observer) in observers.iter() {
            let abnormal_count = match self.store.abnormal_count(observer.source) {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        observer_id = %id,
                        source_id = %observer.source,
                        error = %e,
                        "Abnormal count query failed, skipping notification"
                    );
                    continue;
                }
            };

            let notification = AbnormalNotification {
                message: ABNORMAL_MESSAGE,
                data: reading,
                reason,
                abnormal_count,
            };
            let payload: Arc<str> = match serde_json::to_string(&notification) {
                Ok(json) => json.into(),
                Err(e) => {
                    warn!(observer_id = %id, error = %e, "Failed to serialize notification");
                    continue;
                }
            };

            match observer.sink.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(observer_id = %id, reading_id = reading.id, error = %e, "Observer notification failed");
                    failed.push(*id);
                }
            }
        }

        Self::remove_failed(&mut observers, &failed);
        delivered
    }

    fn remove_failed(observers: &mut HashMap<ObserverId, Observer>, failed: &[ObserverId]) {
        for id in failed {
            observers.remove(id);
            info!(observer_id = %id, observers = observers.len(), "Observer removed after send failure");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, Observer>> {
        self.observers.lock().unwrap_or_else(|e| {
            warn!("Observer registry mutex poisoned, recovering");
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::{FixedOffset, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that records payloads and can be switched to fail.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            let sink = Self::default();
            sink.fail.store(true, Ordering::SeqCst);
            sink
        }

        fn messages(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    impl ObserverSink for RecordingSink {
        fn send(&self, payload: Arc<str>) -> Result<(), ObserverSendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ObserverSendError::Closed);
            }
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    fn reading(source: u64, soil: f64) -> Reading {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        Reading {
            id: 0,
            source_id: SourceId(source),
            timestamp: tz.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            temperature: 25.0,
            humidity: 40.0,
            soil_moisture: soil,
            is_abnormal: !(5.0..=95.0).contains(&soil),
        }
    }

    #[test]
    fn test_register_and_deregister_idempotent() {
        let broadcaster = Broadcaster::new(Arc::new(InMemoryStore::new()));
        let id = broadcaster.register(Arc::new(RecordingSink::default()), SourceId(1));
        assert_eq!(broadcaster.observer_count(), 1);
        assert!(broadcaster.deregister(id));
        assert!(!broadcaster.deregister(id));
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[test]
    fn test_reading_reaches_all_sources_with_identical_bytes() {
        let broadcaster = Broadcaster::new(Arc::new(InMemoryStore::new()));
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        broadcaster.register(a.clone(), SourceId(1));
        broadcaster.register(b.clone(), SourceId(2));

        assert_eq!(broadcaster.broadcast_reading(&reading(1, 40.0)), 2);
        assert_eq!(*a.sent.lock().unwrap(), *b.sent.lock().unwrap());
        assert_eq!(a.messages()[0]["user_id"], 1);
    }

    #[test]
    fn test_failed_observer_removed_others_delivered() {
        let broadcaster = Broadcaster::new(Arc::new(InMemoryStore::new()));
        let good = Arc::new(RecordingSink::default());
        broadcaster.register(good.clone(), SourceId(1));
        broadcaster.register(Arc::new(RecordingSink::failing()), SourceId(1));

        assert_eq!(broadcaster.broadcast_reading(&reading(1, 40.0)), 1);
        assert_eq!(broadcaster.observer_count(), 1);
        assert_eq!(good.messages().len(), 1);
    }

    #[test]
    fn test_notification_count_is_per_observer_source() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(&reading(1, 2.0)).unwrap();
        store.insert(&reading(1, 99.0)).unwrap();
        store.insert(&reading(2, 1.0)).unwrap();

        let broadcaster = Broadcaster::new(store);
        let one = Arc::new(RecordingSink::default());
        let two = Arc::new(RecordingSink::default());
        let three = Arc::new(RecordingSink::default());
        broadcaster.register(one.clone(), SourceId(1));
        broadcaster.register(two.clone(), SourceId(2));
        broadcaster.register(three.clone(), SourceId(3));

        assert_eq!(broadcaster.broadcast_abnormal_notification(&reading(1, 2.0)), 3);

        let n1 = &one.messages()[0];
        assert_eq!(n1["message"], ABNORMAL_MESSAGE);
        assert_eq!(n1["reason"], "Soil Moisture");
        assert_eq!(n1["abnormal_count"], 2);
        assert_eq!(n1["data"]["soil_moisture"], 2.0);
        assert_eq!(two.messages()[0]["abnormal_count"], 1);
        assert_eq!(three.messages()[0]["abnormal_count"], 0);
    }

    #[tokio::test]
    async fn test_mpsc_sink_reports_closed_and_full() {
        let (tx, rx) = mpsc::channel::<Arc<str>>(1);
        assert!(ObserverSink::send(&tx, Arc::from("a")).is_ok());
        assert_eq!(ObserverSink::send(&tx, Arc::from("b")), Err(ObserverSendError::Full));
        drop(rx);
        assert_eq!(ObserverSink::send(&tx, Arc::from("c")), Err(ObserverSendError::Closed));
    }
}
