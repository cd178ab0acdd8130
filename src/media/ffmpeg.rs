//! FFmpeg process wrapper
//!
//! Builds argument lists for the four invocation shapes the pipeline needs
//! (bounded stream copy, H.264/AAC clip re-encode, single-frame thumbnail,
//! fps-sampled preview frames) and runs them with timestamp-based progress
//! reporting. Progress comes from `-progress` key/value output on stdout;
//! stderr is kept as a bounded tail for error reporting.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::MediaError;

/// Lines of stderr retained for the error tail.
const STDERR_TAIL_LINES: usize = 12;

static OUT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").expect("valid regex")
});

/// Parse an `HH:MM:SS.xx` transcoder timestamp into seconds.
pub fn parse_timestamp_secs(text: &str) -> Option<f64> {
    let caps = OUT_TIME_RE.captures(text)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction = caps
        .get(4)
        .map(|m| {
            let digits = m.as_str();
            digits.parse::<f64>().unwrap_or(0.0) / 10f64.powi(digits.len() as i32)
        })
        .unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

/// Progress percentage for `elapsed` seconds of a `total`-second run,
/// clamped to 0..=100.
pub fn progress_percent(elapsed: f64, total: f64) -> u8 {
    if total <= 0.0 {
        return 0;
    }
    ((elapsed / total) * 100.0).clamp(0.0, 100.0) as u8
}

/// Bounded stream copy of a live playlist into a local buffer file.
pub fn capture_args(input_url: &str, duration_secs: u64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input_url.into(),
        "-t".into(),
        duration_secs.to_string(),
        "-c".into(),
        "copy".into(),
        output.display().to_string(),
    ]
}

/// Cut `duration_secs` starting at `start_secs` out of a buffer, re-encoding
/// for web playback.
pub fn clip_args(buffer: &Path, start_secs: f64, duration_secs: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        format!("{start_secs:.3}"),
        "-i".into(),
        buffer.display().to_string(),
        "-t".into(),
        format!("{duration_secs:.3}"),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-crf".into(),
        "22".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.display().to_string(),
    ]
}

/// Single frame at `at_secs`, for thumbnails.
pub fn thumbnail_args(buffer: &Path, at_secs: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        format!("{at_secs:.3}"),
        "-i".into(),
        buffer.display().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        output.display().to_string(),
    ]
}

/// Evenly sampled frames over the whole buffer at `1/interval_secs` fps.
pub fn preview_args(buffer: &Path, interval_secs: u64, output_pattern: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        buffer.display().to_string(),
        "-vf".into(),
        format!("fps=1/{interval_secs}"),
        "-q:v".into(),
        "3".into(),
        output_pattern.display().to_string(),
    ]
}

/// Runs ffmpeg invocations with progress callbacks and cancellation.
#[derive(Clone)]
pub struct FfmpegRunner {
    ffmpeg_path: String,
}

impl FfmpegRunner {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Run to completion without progress reporting (thumbnails, previews).
    pub async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> Result<(), MediaError> {
        self.run_with_progress(args, 0.0, cancel, |_| {}).await
    }

    /// Run an invocation, reporting percentage progress derived from the
    /// transcoder's emitted timestamps over `total_secs`. Cancellation kills
    /// the child process.
    pub async fn run_with_progress(
        &self,
        args: Vec<String>,
        total_secs: f64,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u8) + Send,
    ) -> Result<(), MediaError> {
        // `-progress pipe:1` streams machine-readable key=value lines on
        // stdout, keeping stderr free for the human log we tail on failure.
        let mut full_args = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ];
        full_args.extend(args);

        debug!(program = %self.ffmpeg_path, args = ?full_args, "spawning transcoder");
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                program: self.ffmpeg_path.clone(),
                source,
            })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<f64>();
        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(value) = line.strip_prefix("out_time=") {
                    if let Some(secs) = parse_timestamp_secs(value) {
                        if progress_tx.send(secs).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        // Forward progress while waiting for exit or cancellation.
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = cancel.cancelled() => {
                    warn!(program = %self.ffmpeg_path, "cancellation requested, killing transcoder");
                    let _ = child.kill().await;
                    progress_task.abort();
                    stderr_task.abort();
                    return Err(MediaError::Cancelled);
                }
                Some(secs) = progress_rx.recv() => {
                    if total_secs > 0.0 {
                        on_progress(progress_percent(secs, total_secs));
                    }
                }
            }
        };

        let status = status.map_err(|source| MediaError::Spawn {
            program: self.ffmpeg_path.clone(),
            source,
        })?;

        // Drain whatever progress arrived between the last poll and exit.
        while let Ok(secs) = progress_rx.try_recv() {
            if total_secs > 0.0 {
                on_progress(progress_percent(secs, total_secs));
            }
        }
        let _ = progress_task.await;

        if status.success() {
            Ok(())
        } else {
            let stderr_tail = stderr_task.await.unwrap_or_default();
            Err(MediaError::Exit {
                program: self.ffmpeg_path.clone(),
                status: status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr_tail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn timestamp_parsing() {
        assert_eq!(parse_timestamp_secs("00:00:10.00"), Some(10.0));
        assert_eq!(parse_timestamp_secs("00:01:30.50"), Some(90.5));
        assert_eq!(parse_timestamp_secs("01:00:00"), Some(3600.0));
        assert_eq!(parse_timestamp_secs("garbage"), None);
    }

    #[test]
    fn timestamp_parsing_microsecond_precision() {
        let secs = parse_timestamp_secs("00:00:05.500000").unwrap();
        assert!((secs - 5.5).abs() < 1e-9);
    }

    #[test]
    fn progress_clamps_to_range() {
        assert_eq!(progress_percent(0.0, 240.0), 0);
        assert_eq!(progress_percent(120.0, 240.0), 50);
        assert_eq!(progress_percent(500.0, 240.0), 100);
        assert_eq!(progress_percent(10.0, 0.0), 0);
    }

    #[test]
    fn capture_args_are_copy_only() {
        let args = capture_args("https://cdn.example/live.m3u8", 240, &PathBuf::from("/tmp/b.ts"));
        let joined = args.join(" ");
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-t 240"));
        assert!(!joined.contains("libx264"));
    }

    #[test]
    fn clip_args_encode_for_web() {
        let args = clip_args(
            &PathBuf::from("/tmp/b.ts"),
            10.0,
            30.0,
            &PathBuf::from("/tmp/c.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-ss 10.000"));
        assert!(joined.contains("-t 30.000"));
        assert!(joined.contains("libx264"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-crf 22"));
        assert!(joined.contains("aac"));
        assert!(joined.contains("+faststart"));
    }

    #[test]
    fn preview_args_sample_by_fps() {
        let args = preview_args(
            &PathBuf::from("/tmp/b.ts"),
            24,
            &PathBuf::from("/tmp/p/frame_%03d.jpg"),
        );
        assert!(args.join(" ").contains("fps=1/24"));
    }
}
