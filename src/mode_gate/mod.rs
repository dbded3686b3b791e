//! Developer mode gate
//!
//! A time-bounded switch that suspends AI-assisted correction. While active,
//! submitted soil-moisture readings are stored exactly as received.
//!
//! ## Expiry
//!
//! There is no background timer. Every read evaluates
//! `now - activated_at < window` under the gate's lock; the first caller that
//! observes an elapsed window performs the expiry transition (deactivate and
//! re-enable assisted correction) and gets [`GateCheck::Expired`]. Every
//! later caller sees an already-disabled gate and gets
//! [`GateCheck::Inactive`], so the transition happens exactly once.
//!
//! ## Persistence
//!
//! Transitions are applied in memory first and persisted best-effort. A
//! failed durable write is reported through [`GateTransition::persist_error`]
//! but the in-memory state is never rolled back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::storage::{GateStore, StorageError};

/// The zero value of `activated_at` for a disabled gate.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

/// Durable form of the gate state.
///
/// Invariant: `enabled == false` implies `activated_at` is the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRecord {
    pub enabled: bool,
    pub activated_at: DateTime<Utc>,
    /// Whether AI-assisted correction is globally enabled.
    pub correction_enabled: bool,
}

impl GateRecord {
    /// Disabled gate with the given correction flag.
    pub fn disabled(correction_enabled: bool) -> Self {
        Self {
            enabled: false,
            activated_at: epoch(),
            correction_enabled,
        }
    }

    fn activated(now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            activated_at: now,
            correction_enabled: false,
        }
    }

    /// Repair a record that violates the disabled-implies-epoch invariant.
    fn normalized(mut self) -> Self {
        if !self.enabled {
            self.activated_at = epoch();
        }
        self
    }
}

/// Result of evaluating the gate at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCheck {
    /// Enabled and inside its window.
    Active,
    /// Already disabled.
    Inactive,
    /// Window elapsed; this call performed the expiry transition.
    Expired,
}

impl GateCheck {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Read-side view of the gate, computed after lazy expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub active: bool,
    pub activated_at: DateTime<Utc>,
    /// End of the window while active.
    pub expires_at: Option<DateTime<Utc>>,
    pub correction_enabled: bool,
}

/// Outcome of an explicit activate / deactivate.
#[derive(Debug)]
pub struct GateTransition {
    pub status: GateStatus,
    /// Set when the durable write failed; the in-memory transition still applies.
    pub persist_error: Option<StorageError>,
}

impl GateTransition {
    pub fn persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

/// Process-wide developer mode gate.
///
/// All operations take one exclusive lock, including the combined
/// read-then-maybe-expire of [`ModeGate::check`].
pub struct ModeGate {
    state: Mutex<GateRecord>,
    window: Duration,
    store: Option<Arc<dyn GateStore>>,
}

impl ModeGate {
    /// In-memory gate with no durable backing.
    pub fn new(window: Duration, correction_enabled: bool) -> Self {
        Self {
            state: Mutex::new(GateRecord::disabled(correction_enabled)),
            window,
            store: None,
        }
    }

    /// Restore the gate from durable storage, writing a default record when
    /// none exists. Storage failures degrade to the in-memory default.
    pub fn restore(store: Arc<dyn GateStore>, window: Duration, correction_enabled: bool) -> Self {
        let record = match store.load_gate() {
            Ok(Some(record)) => {
                info!(
                    enabled = record.enabled,
                    activated_at = %record.activated_at,
                    correction_enabled = record.correction_enabled,
                    "Restored developer mode state"
                );
                record.normalized()
            }
            Ok(None) => {
                let record = GateRecord::disabled(correction_enabled);
                if let Err(e) = store.save_gate(&record) {
                    warn!(error = %e, "Failed to write default developer mode state");
                }
                record
            }
            Err(e) => {
                warn!(error = %e, "Failed to load developer mode state, starting disabled");
                GateRecord::disabled(correction_enabled)
            }
        };

        Self {
            state: Mutex::new(record),
            window,
            store: Some(store),
        }
    }

    /// Enable developer mode starting at `now` and suspend assisted
    /// correction. Re-activating restarts the window.
    pub fn activate(&self, now: DateTime<Utc>) -> GateTransition {
        let mut state = self.lock();
        *state = GateRecord::activated(now);
        let persist_error = self.persist(&state);

        info!(
            activated_at = %now,
            expires_at = %(now + self.window),
            "Developer mode activated, assisted correction suspended"
        );

        GateTransition {
            status: self.status_of(&state),
            persist_error,
        }
    }

    /// Disable developer mode and re-enable assisted correction.
    pub fn deactivate(&self) -> GateTransition {
        let mut state = self.lock();
        *state = GateRecord::disabled(true);
        let persist_error = self.persist(&state);

        info!("Developer mode deactivated, assisted correction enabled");

        GateTransition {
            status: self.status_of(&state),
            persist_error,
        }
    }

    /// Evaluate the gate at `now` against an explicit window, performing the
    /// one-time expiry transition if the window has elapsed.
    pub fn check(&self, now: DateTime<Utc>, window: Duration) -> GateCheck {
        let mut state = self.lock();
        self.evaluate(&mut state, now, window)
    }

    /// `true` while developer mode is enabled and `now` is inside `window`.
    pub fn is_active(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.check(now, window).is_active()
    }

    /// Gate status at `now` using the configured window.
    pub fn status(&self, now: DateTime<Utc>) -> GateStatus {
        let mut state = self.lock();
        self.evaluate(&mut state, now, self.window);
        self.status_of(&state)
    }

    fn evaluate(&self, state: &mut GateRecord, now: DateTime<Utc>, window: Duration) -> GateCheck {
        if !state.enabled {
            return GateCheck::Inactive;
        }
        if now - state.activated_at < window {
            return GateCheck::Active;
        }

        let activated_at = state.activated_at;
        *state = GateRecord::disabled(true);
        if let Some(e) = self.persist(state) {
            warn!(error = %e, "Developer mode expired but the new state was not persisted");
        }

        info!(
            activated_at = %activated_at,
            "Developer mode window elapsed, assisted correction re-enabled"
        );
        GateCheck::Expired
    }

    fn status_of(&self, state: &GateRecord) -> GateStatus {
        GateStatus {
            active: state.enabled,
            activated_at: state.activated_at,
            expires_at: state.enabled.then(|| state.activated_at + self.window),
            correction_enabled: state.correction_enabled,
        }
    }

    fn persist(&self, record: &GateRecord) -> Option<StorageError> {
        let store = self.store.as_ref()?;
        match store.save_gate(record) {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to persist developer mode state");
                Some(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateRecord> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Mode gate mutex poisoned, recovering");
            e.into_inner()
        })
    }
}
