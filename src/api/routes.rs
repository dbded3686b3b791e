//! API route definitions
//!
//! - POST /api/v1/readings - submit one reading
//! - GET  /api/v1/device-config - developer mode status
//! - POST /api/v1/device-config/developer-mode - start developer mode
//! - POST /api/v1/device-config/developer-mode/stop - stop developer mode
//! - GET  /api/v1/status - counters, observers, uptime
//! - GET  /api/v1/ws - live channel

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};
use super::live;

/// Versioned API routes, nested under `/api/v1`
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/readings", post(handlers::submit_reading))
        .route("/device-config", get(handlers::get_device_config))
        .route("/device-config/developer-mode", post(handlers::activate_developer_mode))
        .route("/device-config/developer-mode/stop", post(handlers::stop_developer_mode))
        .route("/status", get(handlers::get_status))
        .route("/ws", get(live::live_channel))
        .with_state(state)
}

/// Health endpoint at root level
pub fn health_routes() -> Router {
    Router::new().route("/health", get(handlers::health_check))
}
