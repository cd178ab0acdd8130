//! Clip pipeline endpoints: capture, clip, preview, upload, job status
//!
//! Long-running stages return 202 immediately; progress and completion are
//! streamed over the event bus. Validation failures surface synchronously as
//! 4xx so the client learns about bad input before a job is burned.

use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{AppError, JobError};
use crate::jobs::{Job, JobState};
use crate::models::Platform;
use crate::web::responses::ApiResponse;
use crate::web::AppState;

use super::accepted;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub platform: String,
    pub streamer_id: String,
    pub max_duration: Option<u64>,
}

/// `clipId` is the job id; the UI calls jobs "clips" once captured.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRequest {
    pub clip_id: Uuid,
    pub start_time: f64,
    pub duration: f64,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub clip_id: Uuid,
    pub num_frames: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub clip_id: Uuid,
}

/// POST /api/capture — create a job and start buffering the stream.
pub async fn create_capture(
    State(state): State<AppState>,
    Json(request): Json<CaptureRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Job>>), AppError> {
    let platform: Platform = request
        .platform
        .parse()
        .map_err(|_| AppError::configuration(format!("unknown platform {:?}", request.platform)))?;
    let job = state.start_capture(platform, &request.streamer_id, request.max_duration)?;
    Ok(accepted(job))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<ApiResponse<Vec<Job>>> {
    Json(ApiResponse::success(state.broker.list()))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let job = state.broker.get(id).ok_or(JobError::UnknownJob(id))?;
    Ok(Json(ApiResponse::success(job)))
}

/// POST /api/jobs/{id}/cancel — signal cancellation; the pipeline task
/// performs teardown and moves the job to `error("cancelled")`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<&'static str>>), AppError> {
    state.broker.cancel(id)?;
    Ok(accepted("cancellation requested"))
}

/// POST /api/clip — cut a sub-range out of a captured buffer.
pub async fn create_clip(
    State(state): State<AppState>,
    Json(request): Json<ClipRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Job>>), AppError> {
    // Validate range and state up front so the client gets a synchronous 4xx.
    state
        .extractor
        .validate_range(request.start_time, request.duration)?;
    let job = state
        .broker
        .get(request.clip_id)
        .ok_or(JobError::UnknownJob(request.clip_id))?;
    if job.state != JobState::Captured {
        return Err(JobError::WrongState {
            job_id: job.id,
            expected: JobState::Captured,
            actual: job.state,
        }
        .into());
    }

    let extractor = state.extractor.clone();
    let ClipRequest {
        clip_id,
        start_time,
        duration,
        title,
    } = request;
    tokio::spawn(async move {
        // Failure is reflected on the job itself; nothing to do here.
        let _ = extractor
            .extract_clip(clip_id, start_time, duration, title)
            .await;
    });
    Ok(accepted(job))
}

/// POST /api/preview — sample preview frames over the buffer; returns the
/// ordered frame paths once they exist.
pub async fn generate_preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<ApiResponse<Vec<PathBuf>>>, AppError> {
    let num_frames = request
        .num_frames
        .unwrap_or(state.config.media.default_preview_frames);
    let frames = state
        .extractor
        .generate_previews(request.clip_id, num_frames)
        .await?;
    Ok(Json(ApiResponse::success(frames)))
}

/// POST /api/upload — send a completed clip to the file host.
pub async fn upload_clip(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Job>>), AppError> {
    let job = state
        .broker
        .get(request.clip_id)
        .ok_or(JobError::UnknownJob(request.clip_id))?;
    if job.state != JobState::Completed {
        return Err(JobError::WrongState {
            job_id: job.id,
            expected: JobState::Completed,
            actual: job.state,
        }
        .into());
    }

    let uploader = state.uploader.clone();
    tokio::spawn(async move {
        let _ = uploader.upload(request.clip_id).await;
    });
    Ok(accepted(job))
}
