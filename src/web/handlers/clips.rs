//! Finished-clip endpoints: listing and deletion

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{AppError, JobError};
use crate::web::responses::ApiResponse;
use crate::web::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipFileInfo {
    pub id: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub has_thumbnail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_url: Option<String>,
}

/// GET /api/clips — finished clip files with sizes and thumbnail pairing,
/// newest first.
pub async fn list_clips(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ClipFileInfo>>>, AppError> {
    let clips_dir = state.config.storage.clips_dir();
    let thumbnails_dir = state.config.storage.thumbnails_dir();

    let mut clips = Vec::new();
    for entry in std::fs::read_dir(&clips_dir).map_err(AppError::Io)? {
        let entry = entry.map_err(AppError::Io)?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "mp4") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let meta = entry.metadata().map_err(AppError::Io)?;
        let uploaded_url = stem
            .parse::<Uuid>()
            .ok()
            .and_then(|id| state.broker.get(id))
            .and_then(|job| job.uploaded_url);

        clips.push(ClipFileInfo {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{stem}.mp4")),
            has_thumbnail: thumbnails_dir.join(format!("{stem}.jpg")).exists(),
            size_bytes: meta.len(),
            created_at: meta.modified().ok().map(DateTime::<Utc>::from),
            uploaded_url,
            id: stem,
        });
    }
    clips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(ApiResponse::success(clips)))
}

/// DELETE /api/clips/{id} — remove clip, thumbnail, and registry entry.
///
/// The registry entry only exists for jobs the GC has not pruned yet; a
/// non-terminal job refuses deletion (409) so an in-flight upload cannot
/// lose its file underneath it.
pub async fn delete_clip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<&'static str>>, AppError> {
    if state.broker.get(id).is_some() {
        state.broker.delete(id).map_err(|err| match err {
            JobError::UnknownJob(_) => AppError::not_found("clip", id.to_string()),
            other => other.into(),
        })?;
    }

    let clip = state.config.storage.clips_dir().join(format!("{id}.mp4"));
    let thumbnail = state
        .config
        .storage
        .thumbnails_dir()
        .join(format!("{id}.jpg"));

    let removed = std::fs::remove_file(&clip).is_ok();
    let _ = std::fs::remove_file(&thumbnail);

    if !removed {
        return Err(AppError::not_found("clip", id.to_string()));
    }
    Ok(Json(ApiResponse::success("deleted")))
}
