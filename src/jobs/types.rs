//! Job type definitions
//!
//! A job tracks one clipping pipeline run from creation to its terminal
//! state. States advance monotonically along a fixed graph; `error` is
//! reachable from every non-terminal state.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Platform;

/// Pipeline stage of a clip job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, worker not yet started.
    Initializing,
    /// Discovering the media playlist URL.
    Resolving,
    /// The transcoder is buffering the stream.
    Capturing,
    /// Buffer on disk, ready for clipping.
    Captured,
    /// Cutting and re-encoding a sub-range.
    Processing,
    /// Final clip produced.
    Completed,
    /// Clip is being sent to the file host.
    Uploading,
    /// Host accepted the clip.
    Uploaded,
    Error,
}

impl JobState {
    /// No further transitions happen from a terminal state. `Completed` is
    /// terminal only if the user never requests an upload; the graph still
    /// allows `Completed -> Uploading`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Uploaded | JobState::Error)
    }

    /// Whether `self -> next` is an edge of the transition graph.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Initializing, Resolving)
            | (Resolving, Capturing)
            | (Capturing, Captured)
            | (Captured, Processing)
            | (Processing, Completed)
            | (Completed, Uploading)
            | (Uploading, Uploaded) => true,
            // Error is reachable from anything that can still fail.
            (from, Error) => !matches!(from, Uploaded | Error),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Initializing => "initializing",
            JobState::Resolving => "resolving",
            JobState::Capturing => "capturing",
            JobState::Captured => "captured",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Uploading => "uploading",
            JobState::Uploaded => "uploaded",
            JobState::Error => "error",
        };
        f.write_str(s)
    }
}

/// One clipping pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub platform: Platform,
    pub streamer_ref: String,
    pub state: JobState,
    /// 0..=100, non-decreasing within a state.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_path: Option<PathBuf>,
    /// Effective capture length in seconds, set when the buffer lands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub preview_frames: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl Job {
    pub fn new(platform: Platform, streamer_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            platform,
            streamer_ref: streamer_ref.into(),
            state: JobState::Initializing,
            progress: 0,
            created_at: now,
            updated_at: now,
            title: None,
            stream_url: None,
            buffer_path: None,
            buffer_duration_secs: None,
            clip_path: None,
            thumbnail_path: None,
            preview_frames: Vec::new(),
            uploaded_url: None,
            error_reason: None,
        }
    }
}

/// Fields a transition may set alongside the state change.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub stream_url: Option<String>,
    pub buffer_path: Option<PathBuf>,
    pub buffer_duration_secs: Option<u64>,
    pub clip_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub preview_frames: Option<Vec<PathBuf>>,
    pub uploaded_url: Option<String>,
    pub error_reason: Option<String>,
}

impl JobPatch {
    pub fn error_reason(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, job: &mut Job) {
        if let Some(title) = self.title {
            job.title = Some(title);
        }
        if let Some(url) = self.stream_url {
            job.stream_url = Some(url);
        }
        if let Some(path) = self.buffer_path {
            job.buffer_path = Some(path);
        }
        if let Some(secs) = self.buffer_duration_secs {
            job.buffer_duration_secs = Some(secs);
        }
        if let Some(path) = self.clip_path {
            job.clip_path = Some(path);
        }
        if let Some(path) = self.thumbnail_path {
            job.thumbnail_path = Some(path);
        }
        if let Some(frames) = self.preview_frames {
            job.preview_frames = frames;
        }
        if let Some(url) = self.uploaded_url {
            job.uploaded_url = Some(url);
        }
        if let Some(reason) = self.error_reason {
            job.error_reason = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_a_chain() {
        use JobState::*;
        let path = [
            Initializing,
            Resolving,
            Capturing,
            Captured,
            Processing,
            Completed,
            Uploading,
            Uploaded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn no_skipping_stages() {
        use JobState::*;
        assert!(!Initializing.can_transition_to(Capturing));
        assert!(!Resolving.can_transition_to(Captured));
        assert!(!Captured.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Uploaded));
    }

    #[test]
    fn no_going_backwards() {
        use JobState::*;
        assert!(!Captured.can_transition_to(Resolving));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Uploaded.can_transition_to(Completed));
    }

    #[test]
    fn error_reachable_from_all_but_terminal_success() {
        use JobState::*;
        for from in [
            Initializing,
            Resolving,
            Capturing,
            Captured,
            Processing,
            Completed,
            Uploading,
        ] {
            assert!(from.can_transition_to(Error), "{from} -> error");
        }
        assert!(!Uploaded.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Uploaded.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Capturing.is_terminal());
    }
}
