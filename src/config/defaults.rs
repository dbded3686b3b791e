//! System-wide default constants.
//!
//! Grouped by subsystem. `AppConfig` falls back to these when a key is
//! absent from the TOML file.

// ============================================================================
// Server
// ============================================================================

/// HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Fixed UTC offset of server-assigned reading timestamps (hours).
///
/// +8 = Asia/Kuala_Lumpur, which observes no daylight saving.
pub const UTC_OFFSET_HOURS: i32 = 8;

// ============================================================================
// Storage
// ============================================================================

/// Directory of the sled database.
pub const DATA_DIR: &str = "./data";

// ============================================================================
// Developer Mode
// ============================================================================

/// Developer mode window (seconds). 1 209 600 = 14 days.
pub const DEVELOPER_MODE_WINDOW_SECS: u64 = 1_209_600;

// ============================================================================
// Correction
// ============================================================================

/// Lower edge of the plausible soil-moisture band (%).
pub const PLAUSIBLE_SOIL_MIN: f64 = 5.0;

/// Upper edge of the plausible soil-moisture band (%).
pub const PLAUSIBLE_SOIL_MAX: f64 = 95.0;

/// History considered by the feature builder (hours).
pub const HISTORY_WINDOW_HOURS: u64 = 24;

// ============================================================================
// Predictor
// ============================================================================

/// Prediction service endpoint.
pub const PREDICTOR_URL: &str = "http://127.0.0.1:5001/predict";

/// Upper bound on one prediction call (seconds).
///
/// Minutes-scale: the model service can be slow on a cold start.
pub const PREDICTOR_TIMEOUT_SECS: u64 = 120;

/// Plant profile sent with every prediction.
pub const PLANT_PROFILE: &str = "Hebe andersonii";

// ============================================================================
// Observers
// ============================================================================

/// Interval between server pings on a live channel (seconds).
pub const PING_INTERVAL_SECS: u64 = 30;

/// A live channel silent for this long is closed (seconds).
pub const IDLE_TIMEOUT_SECS: u64 = 60;

/// Largest inbound frame accepted from an observer (bytes).
pub const MAX_MESSAGE_BYTES: usize = 512;

/// Outbound messages buffered per observer before it counts as failed.
pub const SEND_BUFFER: usize = 64;
