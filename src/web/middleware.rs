//! HTTP middleware: API-key authentication and request logging

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Instant;
use tracing::{info, warn};

use super::responses::ApiResponse;
use super::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Require the configured static API key on every request this middleware
/// guards. With no key configured the API is open (development mode).
pub async fn api_key_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.auth.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if presented != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error("invalid or missing API key".to_string())),
        )
            .into_response();
    }
    next.run(request).await
}

/// Log each request with method, path, status and latency.
pub async fn request_logging(method: Method, uri: Uri, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;

    if status >= 400 {
        warn!(method = %method, uri = %uri, status, duration_ms, "request completed with error");
    } else {
        info!(method = %method, uri = %uri, status, duration_ms, "request completed");
    }
    response
}
