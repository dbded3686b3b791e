//! Application configuration schema, loading and validation.
//!
//! Every section and field carries a serde default, so a partial TOML file
//! (or none at all) yields a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "AGROSENSE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "agrosense.toml";

/// Longest accepted developer mode window (10 years).
const MAX_WINDOW_SECS: u64 = 315_360_000;

/// Longest accepted feature history (one year).
const MAX_HISTORY_WINDOW_HOURS: u64 = 8_760;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub mode_gate: ModeGateConfig,

    #[serde(default)]
    pub correction: CorrectionConfig,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub observers: ObserverConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order:
    ///
    /// 1. `explicit` (the `--config` flag), then `$AGROSENSE_CONFIG`
    /// 2. `./agrosense.toml`
    /// 3. Built-in defaults
    ///
    /// A file that fails to load is logged and the next source is tried.
    /// Environment overrides are applied to whichever source wins.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = Self::load_without_overrides(explicit);
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn load_without_overrides(explicit: Option<&Path>) -> Self {
        let candidates = explicit
            .map(|p| (p.to_path_buf(), "--config"))
            .into_iter()
            .chain(std::env::var(CONFIG_ENV).ok().map(|p| (PathBuf::from(p), CONFIG_ENV)));

        for (path, origin) in candidates {
            if !path.exists() {
                warn!(path = %path.display(), origin, "Config path does not exist, falling back");
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), origin, "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load configuration, falling back");
                }
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded configuration from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGROSENSE_SERVER_ADDR` and `PREDICTOR_URL` through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("AGROSENSE_SERVER_ADDR").filter(|v| !v.trim().is_empty()) {
            info!(addr = %addr, "Server address overridden by AGROSENSE_SERVER_ADDR");
            self.server.addr = addr;
        }
        if let Some(url) = lookup("PREDICTOR_URL").filter(|v| !v.trim().is_empty()) {
            info!(url = %url, "Predictor URL overridden by PREDICTOR_URL");
            self.predictor.url = url;
        }
    }

    /// Validate cross-field constraints, collecting every violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.utc_offset_hours.abs() > 14 {
            errors.push(format!(
                "server.utc_offset_hours: must be within -14..=14 (got {})",
                self.server.utc_offset_hours
            ));
        }

        if self.mode_gate.window_secs == 0 || self.mode_gate.window_secs > MAX_WINDOW_SECS {
            errors.push(format!(
                "mode_gate.window_secs: must be within 1..={MAX_WINDOW_SECS} (got {})",
                self.mode_gate.window_secs
            ));
        }

        let c = &self.correction;
        if !c.plausible_min.is_finite() || !c.plausible_max.is_finite() {
            // NaN comparisons silently pass, so check finiteness first
            errors.push(format!(
                "correction: plausible band must be finite (got min={}, max={})",
                c.plausible_min, c.plausible_max
            ));
        } else if c.plausible_min >= c.plausible_max {
            errors.push(format!(
                "correction: plausible_min ({:.1}) must be < plausible_max ({:.1})",
                c.plausible_min, c.plausible_max
            ));
        }
        if c.history_window_hours == 0 || c.history_window_hours > MAX_HISTORY_WINDOW_HOURS {
            errors.push(format!(
                "correction.history_window_hours: must be within 1..={MAX_HISTORY_WINDOW_HOURS} (got {})",
                c.history_window_hours
            ));
        }

        if self.predictor.timeout_secs == 0 {
            errors.push("predictor.timeout_secs: must be > 0".to_string());
        }
        if self.predictor.url.trim().is_empty() {
            errors.push("predictor.url: must not be empty".to_string());
        }

        let o = &self.observers;
        if o.ping_interval_secs == 0 || o.ping_interval_secs >= o.idle_timeout_secs {
            errors.push(format!(
                "observers: ping_interval_secs ({}) must be > 0 and < idle_timeout_secs ({})",
                o.ping_interval_secs, o.idle_timeout_secs
            ));
        }
        if o.send_buffer == 0 {
            errors.push("observers.send_buffer: must be > 0".to_string());
        }
        if o.max_message_bytes == 0 {
            errors.push("observers.max_message_bytes: must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `AGROSENSE_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Fixed UTC offset of server-assigned timestamps (hours).
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}
fn default_utc_offset_hours() -> i32 {
    defaults::UTC_OFFSET_HOURS
}

impl ServerConfig {
    /// Timezone of server-assigned timestamps. Falls back to UTC for an
    /// out-of-range offset (rejected by `validate`).
    pub fn timezone(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        chrono::FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| chrono::Utc.fix())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            utc_offset_hours: default_utc_offset_hours(),
            cors_origins: Vec::new(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database. Overridden by `--data-dir`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// ============================================================================
// Developer Mode
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeGateConfig {
    /// How long developer mode stays on after activation (seconds).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    defaults::DEVELOPER_MODE_WINDOW_SECS
}

impl ModeGateConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

impl Default for ModeGateConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
        }
    }
}

// ============================================================================
// Correction
// ============================================================================

/// When assisted correction is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Every reading, whatever its soil moisture.
    Always,
    /// Only readings whose soil moisture is outside the plausible band.
    #[default]
    OutOfBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default)]
    pub policy: CorrectionMode,

    /// Plausible soil-moisture band (%) for `out_of_band`.
    #[serde(default = "default_plausible_min")]
    pub plausible_min: f64,

    #[serde(default = "default_plausible_max")]
    pub plausible_max: f64,

    /// Initial correction flag when no gate state has been persisted yet.
    #[serde(default = "default_true")]
    pub enabled_on_startup: bool,

    /// History handed to the feature builder (hours).
    #[serde(default = "default_history_window_hours")]
    pub history_window_hours: u64,
}

fn default_plausible_min() -> f64 {
    defaults::PLAUSIBLE_SOIL_MIN
}
fn default_plausible_max() -> f64 {
    defaults::PLAUSIBLE_SOIL_MAX
}
fn default_true() -> bool {
    true
}
fn default_history_window_hours() -> u64 {
    defaults::HISTORY_WINDOW_HOURS
}

impl CorrectionConfig {
    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.history_window_hours.min(MAX_HISTORY_WINDOW_HOURS) as i64)
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            policy: CorrectionMode::default(),
            plausible_min: default_plausible_min(),
            plausible_max: default_plausible_max(),
            enabled_on_startup: default_true(),
            history_window_hours: default_history_window_hours(),
        }
    }
}

// ============================================================================
// Predictor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Prediction endpoint. Overridden by `PREDICTOR_URL`.
    #[serde(default = "default_predictor_url")]
    pub url: String,

    #[serde(default = "default_predictor_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_plant_profile")]
    pub plant_profile: String,
}

fn default_predictor_url() -> String {
    defaults::PREDICTOR_URL.to_string()
}
fn default_predictor_timeout() -> u64 {
    defaults::PREDICTOR_TIMEOUT_SECS
}
fn default_plant_profile() -> String {
    defaults::PLANT_PROFILE.to_string()
}

impl PredictorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            url: default_predictor_url(),
            timeout_secs: default_predictor_timeout(),
            plant_profile: default_plant_profile(),
        }
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Live channel keepalive and buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

fn default_ping_interval() -> u64 {
    defaults::PING_INTERVAL_SECS
}
fn default_idle_timeout() -> u64 {
    defaults::IDLE_TIMEOUT_SECS
}
fn default_max_message_bytes() -> usize {
    defaults::MAX_MESSAGE_BYTES
}
fn default_send_buffer() -> usize {
    defaults::SEND_BUFFER
}

impl ObserverConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            idle_timeout_secs: default_idle_timeout(),
            max_message_bytes: default_max_message_bytes(),
            send_buffer: default_send_buffer(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode_gate.window(), chrono::Duration::days(14));
        assert_eq!(config.correction.policy, CorrectionMode::OutOfBand);
        assert_eq!(config.predictor.plant_profile, "Hebe andersonii");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[correction]
policy = "always"

[observers]
send_buffer = 8
"#,
        )
        .unwrap();
        assert_eq!(config.correction.policy, CorrectionMode::Always);
        assert_eq!(config.correction.plausible_max, 95.0);
        assert_eq!(config.observers.send_buffer, 8);
        assert_eq!(config.observers.ping_interval_secs, 30);
        assert_eq!(config.server.addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.mode_gate.window_secs = 0;
        config.correction.plausible_min = 90.0;
        config.correction.plausible_max = 10.0;
        config.observers.ping_interval_secs = 120;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("window_secs")));
                assert!(errors.iter().any(|e| e.contains("plausible_min")));
                assert!(errors.iter().any(|e| e.contains("ping_interval_secs")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_band_rejected() {
        let mut config = AppConfig::default();
        config.correction.plausible_min = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "AGROSENSE_SERVER_ADDR" => Some("127.0.0.1:9000".to_string()),
            "PREDICTOR_URL" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert_eq!(config.predictor.url, defaults::PREDICTOR_URL);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_timezone() {
        let config = ServerConfig::default();
        assert_eq!(config.timezone().local_minus_utc(), 8 * 3600);
    }
}
