//! HTTP response types
//!
//! Standard envelope for all API endpoints plus the mapping from application
//! errors to HTTP status codes. Client mistakes (bad ranges, illegal job
//! transitions) surface as 4xx; everything else is a 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, JobError, MediaError};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(self)).into_response()
    }
}

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::Job(JobError::UnknownJob(_)) | AppError::NotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        AppError::Job(JobError::InvalidTransition { .. })
        | AppError::Job(JobError::WrongState { .. })
        | AppError::Job(JobError::NotTerminal(_)) => StatusCode::CONFLICT,
        AppError::Job(JobError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Media(MediaError::InvalidRange { .. }) => StatusCode::BAD_REQUEST,
        AppError::Configuration { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn client_errors_map_to_4xx() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_for(&AppError::Job(JobError::UnknownJob(id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&AppError::Media(MediaError::InvalidRange {
                start: -1.0,
                duration: 5.0,
                max: 240,
            })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AppError::Job(JobError::WrongState {
                job_id: id,
                expected: crate::jobs::JobState::Captured,
                actual: crate::jobs::JobState::Capturing,
            })),
            StatusCode::CONFLICT
        );
    }
}
