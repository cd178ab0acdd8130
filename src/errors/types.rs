//! Error type definitions
//!
//! Errors are layered: adapter failures are absorbed into catalog records and
//! never propagate; job-stage failures transition the owning job to `error`
//! with a human-readable reason; client mistakes surface as 4xx on the HTTP
//! layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::jobs::JobState;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Job registry and state-machine errors
#[derive(Error, Debug)]
pub enum JobError {
    /// The requested transition is not an edge of the job state graph.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: uuid::Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("Unknown job: {0}")]
    UnknownJob(uuid::Uuid),

    /// Operation requires a specific state the job is not in.
    #[error("Job {job_id} is {actual}, expected {expected}")]
    WrongState {
        job_id: uuid::Uuid,
        expected: JobState,
        actual: JobState,
    },

    #[error("Job {0} is not in a terminal state")]
    NotTerminal(uuid::Uuid),

    #[error("Service is shutting down, not accepting new jobs")]
    ShuttingDown,
}

/// No media playlist URL could be obtained for a streamer
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{platform}/{streamer}: no live catalog entry and no playlist URL intercepted in time")]
    NoPlaylist { platform: String, streamer: String },

    #[error("{platform}/{streamer}: watch page navigation failed: {reason}")]
    Navigation {
        platform: String,
        streamer: String,
        reason: String,
    },
}

/// External transcoder failures and clip-range validation
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr_tail}")]
    Exit {
        program: String,
        status: String,
        stderr_tail: String,
    },

    /// Client supplied an out-of-bounds clip range.
    #[error("Invalid clip range: start={start}s duration={duration}s (max {max}s)")]
    InvalidRange { start: f64, duration: f64, max: u64 },

    /// The surrounding job was cancelled while the transcoder ran.
    #[error("Transcode cancelled")]
    Cancelled,

    #[error("Buffer file missing: {0}")]
    MissingBuffer(PathBuf),
}

/// Upload host rejection or transport failure
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload host returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upload host refused the file: {reason}")]
    Refused { reason: String },

    #[error("Upload host response did not contain a file URL")]
    MissingUrl,

    #[error("Upload transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Shared headless browser failures
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser session closed")]
    SessionClosed,

    #[error("Page operation failed: {0}")]
    Page(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Page(err.to_string())
    }
}
