//! Clip uploader
//!
//! Streams a finished clip to the anonymous file host as multipart form
//! data, feeding per-chunk progress into the job. The host speaks the
//! pomf-style envelope: `{"success": true, "files": [{"url": ...}]}` on
//! acceptance, `{"success": false, "description": ...}` on refusal. No
//! automatic retry on any failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{AppError, JobError, UploadError};
use crate::jobs::{Job, JobBroker, JobPatch, JobState};

#[derive(Debug, Deserialize)]
struct HostResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    files: Vec<HostFile>,
    /// Error description on refusal.
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostFile {
    url: Option<String>,
}

#[derive(Clone)]
pub struct Uploader {
    broker: JobBroker,
    client: Client,
    endpoint: String,
}

impl Uploader {
    pub fn new(broker: JobBroker, client: Client, endpoint: String) -> Self {
        Self {
            broker,
            client,
            endpoint,
        }
    }

    /// Upload a completed job's clip. Transitions `completed -> uploading ->
    /// uploaded`, or to `error` with the host's reason. The clip file is
    /// left on disk either way.
    pub async fn upload(&self, job_id: Uuid) -> Result<Job, AppError> {
        let job = self
            .broker
            .get(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;
        if job.state != JobState::Completed {
            return Err(JobError::WrongState {
                job_id,
                expected: JobState::Completed,
                actual: job.state,
            }
            .into());
        }
        let clip_path = job
            .clip_path
            .clone()
            .ok_or_else(|| AppError::internal("completed job without clip path"))?;
        let cancel = self
            .broker
            .cancel_token(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;

        self.broker
            .transition(job_id, JobState::Uploading, JobPatch::default())?;

        let result = tokio::select! {
            result = self.send(&clip_path, job_id) => result,
            _ = cancel.cancelled() => {
                let _ = self.broker.fail(job_id, "cancelled");
                return Err(AppError::internal("upload cancelled"));
            }
        };

        match result {
            Ok(url) => {
                let job = self.broker.transition(
                    job_id,
                    JobState::Uploaded,
                    JobPatch {
                        uploaded_url: Some(url.clone()),
                        ..JobPatch::default()
                    },
                )?;
                info!(job_id = %job_id, url = %url, "clip uploaded");
                Ok(job)
            }
            Err(err) => {
                warn!(job_id = %job_id, %err, "upload failed");
                let _ = self.broker.fail(job_id, err.to_string());
                Err(err.into())
            }
        }
    }

    async fn send(&self, clip_path: &std::path::Path, job_id: Uuid) -> Result<String, UploadError> {
        let file = tokio::fs::File::open(clip_path)
            .await
            .map_err(|e| UploadError::Refused {
                reason: format!("clip unreadable: {e}"),
            })?;
        let total = file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        // Wrap the file stream so every chunk bumps the job's progress.
        let sent = Arc::new(AtomicU64::new(0));
        let progress_broker = self.broker.clone();
        let counter = sent.clone();
        let stream = ReaderStream::new(file).inspect_ok(move |chunk| {
            let so_far = counter.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
            if total > 0 {
                let percent = ((so_far as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as u8;
                let _ = progress_broker.update_progress(job_id, percent);
            }
        });

        let file_name = clip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{job_id}.mp4"));
        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(UploadError::Transport)?;
        let form = Form::new().part("files[]", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: HostResponse = response.json().await.map_err(UploadError::Transport)?;
        if !body.success {
            return Err(UploadError::Refused {
                reason: body
                    .description
                    .unwrap_or_else(|| "host reported failure".to_string()),
            });
        }
        body.files
            .into_iter()
            .find_map(|f| f.url)
            .ok_or(UploadError::MissingUrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_envelope_success() {
        let body: HostResponse = serde_json::from_str(
            r#"{"success":true,"files":[{"hash":"x","name":"c.mp4","url":"https://files.example/c.mp4","size":123}]}"#,
        )
        .unwrap();
        assert!(body.success);
        assert_eq!(
            body.files[0].url.as_deref(),
            Some("https://files.example/c.mp4")
        );
    }

    #[test]
    fn host_envelope_refusal_carries_reason() {
        let body: HostResponse = serde_json::from_str(
            r#"{"success":false,"errorcode":400,"description":"too large"}"#,
        )
        .unwrap();
        assert!(!body.success);
        assert_eq!(body.description.as_deref(), Some("too large"));
    }
}
