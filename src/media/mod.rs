//! Media pipeline: ffmpeg invocation, capture worker, clip extraction

pub mod capture;
pub mod clipper;
pub mod ffmpeg;

pub use capture::run_capture_job;
pub use clipper::ClipExtractor;
pub use ffmpeg::FfmpegRunner;
