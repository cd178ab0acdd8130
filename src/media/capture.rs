//! Segment capture worker
//!
//! Drives one job from `initializing` through `captured`: resolve the
//! playlist URL, then stream-copy up to the requested duration into a
//! per-job buffer file. Every failure lands the job in `error` with a
//! readable reason; cancellation kills the transcoder child.

use std::path::PathBuf;

use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::MediaError;
use crate::jobs::{JobBroker, JobPatch, JobState};
use crate::media::ffmpeg::{capture_args, FfmpegRunner};
use crate::resolver::StreamUrlResolver;

/// Run the capture stage of a job to completion. Spawned as an independent
/// task per clip request; returns when the job has reached `captured` or
/// `error`.
pub async fn run_capture_job(
    broker: JobBroker,
    resolver: StreamUrlResolver,
    runner: FfmpegRunner,
    temp_dir: PathBuf,
    job_id: Uuid,
    duration_secs: u64,
) {
    let Some(job) = broker.get(job_id) else {
        warn!(job_id = %job_id, "capture task started for unknown job");
        return;
    };
    let Some(cancel) = broker.cancel_token(job_id) else {
        return;
    };

    if broker
        .transition(job_id, JobState::Resolving, JobPatch::default())
        .is_err()
    {
        // Lost a race with cancellation or the stall sweep.
        return;
    }

    let resolved = tokio::select! {
        resolved = resolver.resolve(job.platform, &job.streamer_ref) => resolved,
        _ = cancel.cancelled() => {
            let _ = broker.fail(job_id, "cancelled");
            return;
        }
    };

    let stream_url = match resolved {
        Ok(url) => url,
        Err(err) => {
            let _ = broker.fail(job_id, err.to_string());
            return;
        }
    };

    let buffer_path = temp_dir.join(format!("buffer_{job_id}.ts"));
    if broker
        .transition(
            job_id,
            JobState::Capturing,
            JobPatch {
                stream_url: Some(stream_url.clone()),
                ..JobPatch::default()
            },
        )
        .is_err()
    {
        return;
    }

    info!(job_id = %job_id, duration_secs, "capture started");
    let progress_broker = broker.clone();
    let result = runner
        .run_with_progress(
            capture_args(&stream_url, duration_secs, &buffer_path),
            duration_secs as f64,
            &cancel,
            move |percent| {
                let _ = progress_broker.update_progress(job_id, percent);
            },
        )
        .await;

    match result {
        Ok(()) => {
            let _ = broker.transition(
                job_id,
                JobState::Captured,
                JobPatch {
                    buffer_path: Some(buffer_path),
                    buffer_duration_secs: Some(duration_secs),
                    ..JobPatch::default()
                },
            );
            info!(job_id = %job_id, "capture complete");
        }
        Err(MediaError::Cancelled) => {
            // Partial buffer stays on disk; the daily sweep reclaims it.
            let _ = broker.fail(job_id, "cancelled");
        }
        Err(err) => {
            warn!(job_id = %job_id, %err, "capture failed");
            let _ = broker.fail(job_id, err.to_string());
        }
    }
}
