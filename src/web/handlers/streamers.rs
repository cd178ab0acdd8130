//! Catalog endpoints: streamer listings and manual refresh triggers

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::models::{Platform, StreamerRecord};
use crate::web::responses::ApiResponse;
use crate::web::AppState;

use super::accepted;

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    raw.parse::<Platform>()
        .map_err(|_| AppError::not_found("platform", raw))
}

/// GET /api/streamers — the whole catalog, partitioned by platform. Each
/// partition preserves the snapshot's global order.
pub async fn list_streamers(
    State(state): State<AppState>,
) -> Json<ApiResponse<BTreeMap<String, Vec<StreamerRecord>>>> {
    let snapshot = state.store.latest();
    let mut by_platform: BTreeMap<String, Vec<StreamerRecord>> = BTreeMap::new();
    for record in snapshot.streamers {
        by_platform
            .entry(record.platform.to_string())
            .or_default()
            .push(record);
    }
    Json(ApiResponse::success(by_platform))
}

/// GET /api/streamers/live — live subset, highest viewer count first.
pub async fn live_streamers(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<StreamerRecord>>> {
    let snapshot = state.store.latest();
    // The snapshot's total order already puts live records first, sorted by
    // viewer count.
    Json(ApiResponse::success(
        snapshot.live().cloned().collect::<Vec<_>>(),
    ))
}

/// GET /api/streamers/{platform} — one platform's slice; 404 on unknown.
pub async fn platform_streamers(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<ApiResponse<Vec<StreamerRecord>>>, AppError> {
    let platform = parse_platform(&platform)?;
    let snapshot = state.store.latest();
    Ok(Json(ApiResponse::success(
        snapshot.platform(platform).cloned().collect::<Vec<_>>(),
    )))
}

/// POST /api/refresh — schedule an immediate full refresh; 202.
pub async fn refresh_all(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<&'static str>>) {
    state.trigger_refresh(None);
    accepted("refresh scheduled")
}

/// POST /api/refresh/{platform} — scoped refresh; 202.
pub async fn refresh_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<&'static str>>), AppError> {
    let platform = parse_platform(&platform)?;
    state.trigger_refresh(Some(platform));
    Ok(accepted("refresh scheduled"))
}
