//! Clip extractor
//!
//! Operations on a `captured` job: cut a validated sub-range out of the
//! buffer into a web-playable clip (plus a best-effort mid-point thumbnail),
//! and sample evenly spaced preview frames over the whole buffer for the
//! range-picker UI.

use std::path::PathBuf;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::errors::{AppError, JobError, MediaError};
use crate::events::{BusEvent, EventBus};
use crate::jobs::{Job, JobBroker, JobPatch, JobState};
use crate::media::ffmpeg::{clip_args, preview_args, thumbnail_args, FfmpegRunner};

#[derive(Clone)]
pub struct ClipExtractor {
    broker: JobBroker,
    runner: FfmpegRunner,
    storage: StorageConfig,
    bus: EventBus,
    max_clip_duration_secs: u64,
}

impl ClipExtractor {
    pub fn new(
        broker: JobBroker,
        runner: FfmpegRunner,
        storage: StorageConfig,
        bus: EventBus,
        max_clip_duration_secs: u64,
    ) -> Self {
        Self {
            broker,
            runner,
            storage,
            bus,
            max_clip_duration_secs,
        }
    }

    pub fn validate_range(&self, start_secs: f64, duration_secs: f64) -> Result<(), MediaError> {
        let max = self.max_clip_duration_secs;
        if start_secs < 0.0
            || duration_secs <= 0.0
            || start_secs + duration_secs > max as f64
        {
            return Err(MediaError::InvalidRange {
                start: start_secs,
                duration: duration_secs,
                max,
            });
        }
        Ok(())
    }

    /// Cut `[start, start+duration)` out of the job's buffer, re-encode for
    /// web delivery, and produce the mid-point thumbnail. Transitions the job
    /// `captured -> processing -> completed`.
    pub async fn extract_clip(
        &self,
        job_id: Uuid,
        start_secs: f64,
        duration_secs: f64,
        title: Option<String>,
    ) -> Result<Job, AppError> {
        self.validate_range(start_secs, duration_secs)?;

        let job = self
            .broker
            .get(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;
        let buffer_path = match (&job.state, &job.buffer_path) {
            (JobState::Captured, Some(path)) => path.clone(),
            (JobState::Captured, None) => {
                return Err(MediaError::MissingBuffer(PathBuf::new()).into());
            }
            (state, _) => {
                return Err(JobError::WrongState {
                    job_id,
                    expected: JobState::Captured,
                    actual: *state,
                }
                .into());
            }
        };
        if !buffer_path.exists() {
            self.broker.fail(job_id, "buffer file missing")?;
            return Err(MediaError::MissingBuffer(buffer_path).into());
        }

        let cancel = self
            .broker
            .cancel_token(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;

        self.broker.transition(
            job_id,
            JobState::Processing,
            JobPatch {
                title,
                ..JobPatch::default()
            },
        )?;

        let clip_path = self.storage.clips_dir().join(format!("{job_id}.mp4"));
        let progress_broker = self.broker.clone();
        let result = self
            .runner
            .run_with_progress(
                clip_args(&buffer_path, start_secs, duration_secs, &clip_path),
                duration_secs,
                &cancel,
                move |percent| {
                    let _ = progress_broker.update_progress(job_id, percent);
                },
            )
            .await;

        match result {
            Ok(()) => {}
            Err(MediaError::Cancelled) => {
                let _ = self.broker.fail(job_id, "cancelled");
                return Err(MediaError::Cancelled.into());
            }
            Err(err) => {
                let _ = self.broker.fail(job_id, err.to_string());
                return Err(err.into());
            }
        }

        // Thumbnail is a side effect; its failure never fails the clip.
        let thumbnail_path = self
            .storage
            .thumbnails_dir()
            .join(format!("{job_id}.jpg"));
        let midpoint = start_secs + duration_secs / 2.0;
        let thumbnail = match self
            .runner
            .run(thumbnail_args(&buffer_path, midpoint, &thumbnail_path), &cancel)
            .await
        {
            Ok(()) => Some(thumbnail_path),
            Err(err) => {
                warn!(job_id = %job_id, %err, "thumbnail generation failed");
                None
            }
        };

        let job = self.broker.transition(
            job_id,
            JobState::Completed,
            JobPatch {
                clip_path: Some(clip_path),
                thumbnail_path: thumbnail,
                ..JobPatch::default()
            },
        )?;
        info!(job_id = %job_id, start_secs, duration_secs, "clip extracted");
        Ok(job)
    }

    /// Sample `num_frames` evenly spaced frames over the whole buffer into
    /// the job's preview directory. Leaves job state untouched.
    pub async fn generate_previews(
        &self,
        job_id: Uuid,
        num_frames: u32,
    ) -> Result<Vec<PathBuf>, AppError> {
        let job = self
            .broker
            .get(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;
        if job.state != JobState::Captured {
            return Err(JobError::WrongState {
                job_id,
                expected: JobState::Captured,
                actual: job.state,
            }
            .into());
        }
        let buffer_path = job
            .buffer_path
            .clone()
            .ok_or_else(|| MediaError::MissingBuffer(PathBuf::new()))?;

        let num_frames = num_frames.max(1);
        let interval_secs = (self.max_clip_duration_secs / num_frames as u64).max(1);

        let preview_dir = self.storage.preview_dir(job_id);
        std::fs::create_dir_all(&preview_dir).map_err(AppError::Io)?;

        let cancel = self
            .broker
            .cancel_token(job_id)
            .ok_or(JobError::UnknownJob(job_id))?;
        let pattern = preview_dir.join("frame_%03d.jpg");
        self.runner
            .run(preview_args(&buffer_path, interval_secs, &pattern), &cancel)
            .await?;

        let mut frames: Vec<PathBuf> = std::fs::read_dir(&preview_dir)
            .map_err(AppError::Io)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "jpg"))
            .collect();
        frames.sort();

        self.broker.annotate(
            job_id,
            JobPatch {
                preview_frames: Some(frames.clone()),
                ..JobPatch::default()
            },
        )?;
        self.bus.publish(BusEvent::PreviewComplete {
            job_id,
            frames: frames.len(),
        });
        debug!(job_id = %job_id, frames = frames.len(), "preview frames generated");
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn extractor(max: u64) -> ClipExtractor {
        let bus = EventBus::new();
        ClipExtractor::new(
            JobBroker::new(bus.clone()),
            FfmpegRunner::new("ffmpeg"),
            StorageConfig {
                data_dir: std::env::temp_dir().join("stream-clipper-test"),
            },
            bus,
            max,
        )
    }

    #[test]
    fn range_validation() {
        let ex = extractor(240);
        assert!(ex.validate_range(0.0, 240.0).is_ok());
        assert!(ex.validate_range(10.0, 30.0).is_ok());
        assert!(ex.validate_range(239.0, 1.0).is_ok());

        assert!(matches!(
            ex.validate_range(-1.0, 30.0),
            Err(MediaError::InvalidRange { .. })
        ));
        assert!(matches!(
            ex.validate_range(0.0, 0.0),
            Err(MediaError::InvalidRange { .. })
        ));
        assert!(matches!(
            ex.validate_range(0.0, -5.0),
            Err(MediaError::InvalidRange { .. })
        ));
        assert!(matches!(
            ex.validate_range(230.0, 20.0),
            Err(MediaError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn extract_requires_captured_state() {
        let ex = extractor(240);
        let job = ex.broker.create(Platform::Twitch, "kai").unwrap();
        let err = ex.extract_clip(job.id, 0.0, 10.0, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Job(JobError::WrongState { .. })
        ));
    }

    #[tokio::test]
    async fn preview_requires_captured_state() {
        let ex = extractor(240);
        let job = ex.broker.create(Platform::Twitch, "kai").unwrap();
        let err = ex.generate_previews(job.id, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::WrongState { .. })));
    }
}
