//! Source identity extractor
//!
//! Devices send `X-Source-ID`. Browser live-channel clients cannot set
//! headers on a WebSocket upgrade, so `?source_id=` is accepted as well.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::response::Response;
use serde::Deserialize;

use super::envelope::ApiErrorResponse;
use crate::types::SourceId;

/// Header carrying the source identity.
pub const SOURCE_HEADER: &str = "x-source-id";

/// Source the request is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceIdentity(pub SourceId);

#[derive(Debug, Deserialize)]
struct SourceQuery {
    source_id: Option<String>,
}

fn from_header(parts: &Parts) -> Option<Result<SourceId, String>> {
    let value = parts.headers.get(SOURCE_HEADER)?;
    Some(
        value
            .to_str()
            .map_err(|_| "X-Source-ID is not valid text".to_string())
            .and_then(|s| s.parse().map_err(|_| format!("X-Source-ID is not a valid id: {s}"))),
    )
}

fn from_query(parts: &Parts) -> Option<Result<SourceId, String>> {
    let Query(query) = Query::<SourceQuery>::try_from_uri(&parts.uri).ok()?;
    let raw = query.source_id?;
    Some(raw.parse().map_err(|_| format!("source_id is not a valid id: {raw}")))
}

#[async_trait]
impl<S> FromRequestParts<S> for SourceIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match from_header(parts).or_else(|| from_query(parts)) {
            Some(Ok(id)) => Ok(SourceIdentity(id)),
            Some(Err(msg)) => Err(ApiErrorResponse::unauthorized(msg)),
            None => Err(ApiErrorResponse::unauthorized(
                "missing source identity (X-Source-ID header or source_id query parameter)",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(req: Request<()>) -> Result<SourceIdentity, Response> {
        let (mut parts, _) = req.into_parts();
        SourceIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_header() {
        let req = Request::builder()
            .uri("/api/v1/readings")
            .header("X-Source-ID", "42")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap(), SourceIdentity(SourceId(42)));
    }

    #[tokio::test]
    async fn test_query_fallback() {
        let req = Request::builder().uri("/api/v1/ws?source_id=7").body(()).unwrap();
        assert_eq!(extract(req).await.unwrap(), SourceIdentity(SourceId(7)));
    }

    #[tokio::test]
    async fn test_header_wins_over_query() {
        let req = Request::builder()
            .uri("/api/v1/ws?source_id=7")
            .header("X-Source-ID", "8")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap(), SourceIdentity(SourceId(8)));
    }

    #[tokio::test]
    async fn test_missing_or_invalid_is_unauthorized() {
        let req = Request::builder().uri("/api/v1/readings").body(()).unwrap();
        assert_eq!(extract(req).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/readings")
            .header("X-Source-ID", "abc")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }
}
