//! Soil-moisture predictor client
//!
//! The ingestion pipeline only sees [`SoilMoisturePredictor`], so the
//! external service can be stubbed entirely in tests. [`HttpPredictor`] is
//! the production implementation and posts the engineered features as JSON.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::features::FeatureVector;
use crate::types::SourceId;

/// Predictor failures. Always recovered by the caller, never surfaced to
/// the submitter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("predictor transport error: {0}")]
    Transport(String),
    #[error("malformed predictor response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for PredictionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Everything the predictor needs for one correction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub source_id: SourceId,
    pub plant_profile: String,
    pub timestamp: DateTime<FixedOffset>,
    pub temperature: f64,
    pub humidity: f64,
    pub features: FeatureVector,
}

/// Capability interface for soil-moisture correction.
#[async_trait]
pub trait SoilMoisturePredictor: Send + Sync {
    /// Predicted soil moisture (%) for the request.
    async fn predict(&self, request: &PredictionRequest) -> Result<f64, PredictionError>;

    /// Name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Wire format
// ============================================================================

/// JSON body sent to the prediction service. Numbers travel as strings with
/// one decimal place.
#[derive(Debug, Serialize)]
struct WireRequest {
    source_id: u64,
    plant_name: String,
    timestamp: String,
    temperature: String,
    humidity: String,
    temp_rolling_3: String,
    humidity_rolling_3: String,
    temp_rolling_24: String,
    humidity_rolling_24: String,
    temp_lag_1: String,
    humidity_lag_1: String,
}

fn one_decimal(value: f64) -> String {
    format!("{value:.1}")
}

impl From<&PredictionRequest> for WireRequest {
    fn from(req: &PredictionRequest) -> Self {
        let f = &req.features;
        Self {
            source_id: req.source_id.0,
            plant_name: req.plant_profile.clone(),
            timestamp: req.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            temperature: one_decimal(req.temperature),
            humidity: one_decimal(req.humidity),
            temp_rolling_3: one_decimal(f.temp_rolling_3),
            humidity_rolling_3: one_decimal(f.humidity_rolling_3),
            temp_rolling_24: one_decimal(f.temp_rolling_24),
            humidity_rolling_24: one_decimal(f.humidity_rolling_24),
            temp_lag_1: one_decimal(f.temp_lag_1),
            humidity_lag_1: one_decimal(f.humidity_lag_1),
        }
    }
}

/// Extract `predicted_soil_moisture` from a response body.
fn parse_prediction(body: &[u8]) -> Result<f64, PredictionError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PredictionError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let field = value.get("predicted_soil_moisture").ok_or_else(|| {
        PredictionError::MalformedResponse("missing predicted_soil_moisture".to_string())
    })?;

    match field.as_f64() {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(PredictionError::MalformedResponse(format!(
            "predicted_soil_moisture is not a finite number: {field}"
        ))),
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Predictor backed by the external HTTP prediction service.
#[derive(Clone)]
pub struct HttpPredictor {
    http: reqwest::Client,
    url: String,
}

impl HttpPredictor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PredictionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictionError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SoilMoisturePredictor for HttpPredictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<f64, PredictionError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&WireRequest::from(request))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        let predicted = parse_prediction(&body)?;

        if !status.is_success() {
            warn!(
                status = %status,
                source_id = %request.source_id,
                "Predictor returned error status with a usable prediction"
            );
        }

        Ok(predicted)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;

    /// Serve `router` on an ephemeral localhost port and return its URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/predict")
    }

    fn request() -> PredictionRequest {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        PredictionRequest {
            source_id: SourceId(3),
            plant_profile: "Hebe andersonii".to_string(),
            timestamp: tz.with_ymd_and_hms(2025, 3, 1, 14, 5, 9).unwrap(),
            temperature: 25.04,
            humidity: 40.0,
            features: FeatureVector {
                temperature: 25.04,
                humidity: 40.0,
                temp_rolling_3: 24.333,
                humidity_rolling_3: 41.666,
                temp_rolling_24: 23.0,
                humidity_rolling_24: 45.25,
                temp_lag_1: 24.0,
                humidity_lag_1: 42.0,
            },
        }
    }

    #[test]
    fn test_wire_request_formatting() {
        let wire = serde_json::to_value(WireRequest::from(&request())).unwrap();
        assert_eq!(wire["source_id"], 3);
        assert_eq!(wire["plant_name"], "Hebe andersonii");
        assert_eq!(wire["timestamp"], "2025-03-01 14:05:09");
        assert_eq!(wire["temperature"], "25.0");
        assert_eq!(wire["temp_rolling_3"], "24.3");
        assert_eq!(wire["humidity_rolling_3"], "41.7");
        assert_eq!(wire["humidity_lag_1"], "42.0");
    }

    #[test]
    fn test_parse_prediction() {
        assert_eq!(
            parse_prediction(br#"{"predicted_soil_moisture": 45.5, "timestamp": "x"}"#).unwrap(),
            45.5
        );
        assert_eq!(parse_prediction(br#"{"predicted_soil_moisture": 40}"#).unwrap(), 40.0);
    }

    #[test]
    fn test_parse_prediction_malformed() {
        for body in [
            &b"not json"[..],
            br#"{"error": "model not loaded"}"#,
            br#"{"predicted_soil_moisture": "45.5"}"#,
            br#"{"predicted_soil_moisture": null}"#,
        ] {
            assert!(matches!(
                parse_prediction(body),
                Err(PredictionError::MalformedResponse(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to accept HTTP
        let predictor = HttpPredictor::new("http://127.0.0.1:9/predict", Duration::from_secs(2)).unwrap();
        let err = predictor.predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_success_status_returns_prediction() {
        let url = serve(Router::new().route(
            "/predict",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["temperature"], "25.0");
                Json(serde_json::json!({ "predicted_soil_moisture": 44.0 }))
            }),
        ))
        .await;

        let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(predictor.predict(&request()).await.unwrap(), 44.0);
    }

    #[tokio::test]
    async fn test_error_status_with_usable_body_is_accepted() {
        let url = serve(Router::new().route(
            "/predict",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "predicted_soil_moisture": 41.5 })),
                )
            }),
        ))
        .await;

        let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(predictor.predict(&request()).await.unwrap(), 41.5);
    }

    #[tokio::test]
    async fn test_error_status_with_plain_text_is_malformed() {
        let url = serve(Router::new().route(
            "/predict",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream unavailable") }),
        ))
        .await;

        let predictor = HttpPredictor::new(&url, Duration::from_secs(5)).unwrap();
        let err = predictor.predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictionError::MalformedResponse(_)), "{err:?}");
    }
}
