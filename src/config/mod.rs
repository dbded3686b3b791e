//! Application Configuration Module
//!
//! Service configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `--config` flag, then the `AGROSENSE_CONFIG` environment variable
//! 2. `agrosense.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! `AGROSENSE_SERVER_ADDR` and `PREDICTOR_URL` override the loaded values.
//! The loaded config is passed explicitly to each component at startup.

mod app_config;
pub mod defaults;

pub use app_config::*;
