//! Reading and gate-state storage
//!
//! Durable storage is the system of record: historical windows for the
//! feature builder and per-source abnormal counts for notifications are
//! always read back from here, never from in-memory caches.

pub mod persistence;
mod readings;

pub use persistence::{GateStore, InMemoryStore, ReadingStore, StorageError};
pub use readings::SledStore;
