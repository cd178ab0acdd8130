//! Default configuration values

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_DATA_DIR: &str = "./data";

/// Catalog refresh cadence.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
/// Whole-platform safeguard when fanning out one refresh.
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 300;
/// Concurrent fetches per API platform.
pub const DEFAULT_API_CONCURRENCY: usize = 5;
/// Per-streamer wall cap applied by the aggregator.
pub const DEFAULT_STREAMER_TIMEOUT_SECS: u64 = 60;

/// Per-request timeout for platform API calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Hard cap on capture length and clip ranges.
pub const DEFAULT_MAX_CLIP_DURATION_SECS: u64 = 240;
pub const DEFAULT_PREVIEW_FRAMES: u32 = 10;
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://uguu.se/upload.php";

pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SELECTOR_TIMEOUT_SECS: u64 = 3;
/// Wait after nudging the video element before giving up on a playlist URL.
pub const DEFAULT_PLAYLIST_WAIT_SECS: u64 = 10;

/// Artifacts and terminal jobs are pruned after this long.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
/// Non-terminal jobs idle longer than this are force-failed.
pub const DEFAULT_STALL_MINUTES: i64 = 30;
/// Disk usage fraction above which the pressure sweep prunes old clips.
pub const DEFAULT_DISK_PRESSURE_THRESHOLD: f64 = 0.90;
/// Fraction of oldest clips removed per pressure iteration.
pub const DEFAULT_DISK_PRESSURE_PRUNE_FRACTION: f64 = 0.10;

/// Cron expression for the daily sweep (local midnight).
pub const DEFAULT_DAILY_SWEEP_CRON: &str = "0 0 0 * * *";
pub const DEFAULT_STALL_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_DISK_SWEEP_INTERVAL_SECS: u64 = 21_600;

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36".to_string()
}
