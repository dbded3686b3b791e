//! API request handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use super::source::SourceIdentity;
use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::mode_gate::{GateStatus, ModeGate};
use crate::pipeline::{IngestError, IngestionPipeline, PipelineStats};
use crate::types::ReadingSubmission;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<IngestionPipeline>,
    pub gate: Arc<ModeGate>,
    pub broadcaster: Arc<Broadcaster>,
    pub config: Arc<AppConfig>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        gate: Arc<ModeGate>,
        broadcaster: Arc<Broadcaster>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pipeline,
            gate,
            broadcaster,
            config,
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// POST /api/v1/readings
pub async fn submit_reading(
    State(state): State<ApiState>,
    SourceIdentity(source): SourceIdentity,
    payload: Result<Json<ReadingSubmission>, JsonRejection>,
) -> Response {
    let Json(submission) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            state.pipeline.record_rejected();
            return ApiErrorResponse::bad_request(format!("invalid reading: {}", rejection.body_text()));
        }
    };

    let now = Utc::now().with_timezone(&state.config.server.timezone());
    match state.pipeline.ingest(source, submission, now).await {
        Ok(outcome) => ApiResponse::ok(outcome),
        Err(e @ IngestError::Validation(_)) => ApiErrorResponse::bad_request(e.to_string()),
        Err(e @ IngestError::Persistence(_)) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Developer Mode
// ============================================================================

/// GET /api/v1/device-config
pub async fn get_device_config(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.gate.status(Utc::now()))
}

#[derive(Debug, Serialize)]
pub struct DeveloperModeResponse {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub correction_enabled: bool,
    /// `false` when the new state could not be written to storage.
    pub persisted: bool,
}

/// POST /api/v1/device-config/developer-mode
pub async fn activate_developer_mode(
    State(state): State<ApiState>,
    operator: Option<SourceIdentity>,
) -> Response {
    let transition = state.gate.activate(Utc::now());
    if let Some(SourceIdentity(source)) = operator {
        info!(source_id = %source, "Developer mode requested");
    }
    if let Some(e) = &transition.persist_error {
        warn!(error = %e, "Developer mode activated in memory only");
    }

    ApiResponse::ok(DeveloperModeResponse {
        active: transition.status.active,
        started_at: Some(transition.status.activated_at),
        expires_at: transition.status.expires_at,
        correction_enabled: transition.status.correction_enabled,
        persisted: transition.persisted(),
    })
}

/// POST /api/v1/device-config/developer-mode/stop
pub async fn stop_developer_mode(
    State(state): State<ApiState>,
    operator: Option<SourceIdentity>,
) -> Response {
    let transition = state.gate.deactivate();
    if let Some(SourceIdentity(source)) = operator {
        info!(source_id = %source, "Developer mode stop requested");
    }
    if let Some(e) = &transition.persist_error {
        warn!(error = %e, "Developer mode stopped in memory only");
    }

    ApiResponse::ok(DeveloperModeResponse {
        active: transition.status.active,
        started_at: None,
        expires_at: None,
        correction_enabled: transition.status.correction_enabled,
        persisted: transition.persisted(),
    })
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_secs: i64,
    pub observers: usize,
    pub pipeline: PipelineStats,
    pub developer_mode: GateStatus,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> Response {
    let now = Utc::now();
    ApiResponse::ok(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (now - state.started_at).num_seconds(),
        observers: state.broadcaster.observer_count(),
        pipeline: state.pipeline.stats(),
        developer_mode: state.gate.status(now),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
