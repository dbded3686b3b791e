//! REST API module using Axum
//!
//! HTTP ingestion, developer mode control and the WebSocket live channel.
//! JSON responses use the envelope in [`envelope`].

pub mod envelope;
pub mod handlers;
mod live;
mod routes;
pub mod source;

pub use handlers::ApiState;
pub use source::SourceIdentity;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// `server.cors_origins` lists allowed origins for development
/// (e.g., `http://localhost:5173`).
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(source::SOURCE_HEADER)]);

    if origins.is_empty() {
        return base;
    }

    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.trim().parse().ok()).collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    base.allow_origin(allowed)
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors_origins);

    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .merge(routes::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
