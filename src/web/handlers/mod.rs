//! HTTP request handlers, organized by domain

use axum::Json;

use super::responses::ApiResponse;

pub mod clips;
pub mod jobs;
pub mod streamers;

/// Unauthenticated liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(super) fn accepted<T: serde::Serialize>(
    data: T,
) -> (axum::http::StatusCode, Json<ApiResponse<T>>) {
    (
        axum::http::StatusCode::ACCEPTED,
        Json(ApiResponse::success(data)),
    )
}
