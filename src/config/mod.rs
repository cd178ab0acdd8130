//! Application configuration
//!
//! Configuration comes from three places, later sources overriding earlier
//! ones: built-in defaults, the INI credentials/roster file, and environment
//! variables (`PORT`, `LOG_LEVEL`, `REFRESH_INTERVAL`, `MAX_CLIP_DURATION`,
//! `API_KEY`, `UPLOAD_ENDPOINT`, `PLATFORM_<NAME>_ENABLED`). The roster is
//! immutable for the process lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ini::Ini;
use serde::{Deserialize, Serialize};

use crate::models::Platform;

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub web: WebConfig,
    pub auth: AuthConfig,
    pub refresh: RefreshConfig,
    pub media: MediaConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub browser: BrowserSettings,
    pub gc: GcConfig,
    pub platforms: PlatformsConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static key required in `X-API-Key` on all `/api/*` routes. When unset
    /// the API is open; intended for local development only.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub platform_timeout_secs: u64,
    pub streamer_timeout_secs: u64,
    pub api_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub max_clip_duration_secs: u64,
    pub default_preview_frames: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.data_dir.join("clips")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }

    pub fn preview_dir(&self, job_id: uuid::Uuid) -> PathBuf {
        self.temp_dir().join(format!("preview_{job_id}"))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    /// Create the on-disk layout if it does not exist yet.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.temp_dir())?;
        std::fs::create_dir_all(self.clips_dir())?;
        std::fs::create_dir_all(self.thumbnails_dir())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Explicit Chromium binary; autodetected when unset.
    pub executable: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    pub playlist_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    pub retention_hours: i64,
    pub stall_minutes: i64,
    pub daily_sweep_cron: String,
    pub stall_sweep_interval_secs: u64,
    pub disk_sweep_interval_secs: u64,
    pub disk_pressure_threshold: f64,
    pub disk_prune_fraction: f64,
}

/// Per-platform roster and enable flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformRoster {
    pub enabled: bool,
    pub streamers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub parti: PlatformRoster,
    pub dlive: PlatformRoster,
    pub trovo: PlatformRoster,
    pub twitch: PlatformRoster,
    pub kick: PlatformRoster,
    pub youtube: PlatformRoster,
}

impl PlatformsConfig {
    pub fn roster(&self, platform: Platform) -> &PlatformRoster {
        match platform {
            Platform::Parti => &self.parti,
            Platform::DLive => &self.dlive,
            Platform::Trovo => &self.trovo,
            Platform::Twitch => &self.twitch,
            Platform::Kick => &self.kick,
            Platform::YouTube => &self.youtube,
        }
    }

    fn roster_mut(&mut self, platform: Platform) -> &mut PlatformRoster {
        match platform {
            Platform::Parti => &mut self.parti,
            Platform::DLive => &mut self.dlive,
            Platform::Trovo => &mut self.trovo,
            Platform::Twitch => &mut self.twitch,
            Platform::Kick => &mut self.kick,
            Platform::YouTube => &mut self.youtube,
        }
    }

    /// Platforms that are enabled and have at least one roster entry.
    pub fn active(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| {
                let roster = self.roster(*p);
                roster.enabled && !roster.streamers.is_empty()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub twitch_client_id: Option<String>,
    pub twitch_client_secret: Option<String>,
    pub trovo_client_id: Option<String>,
    /// Extra client token sent as `x-client-token` on Kick scrape sessions.
    pub kick_client_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                user_agent: default_user_agent(),
                http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            auth: AuthConfig::default(),
            refresh: RefreshConfig {
                interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
                platform_timeout_secs: DEFAULT_PLATFORM_TIMEOUT_SECS,
                streamer_timeout_secs: DEFAULT_STREAMER_TIMEOUT_SECS,
                api_concurrency: DEFAULT_API_CONCURRENCY,
            },
            media: MediaConfig {
                ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
                max_clip_duration_secs: DEFAULT_MAX_CLIP_DURATION_SECS,
                default_preview_frames: DEFAULT_PREVIEW_FRAMES,
            },
            upload: UploadConfig {
                endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            },
            browser: BrowserSettings {
                executable: None,
                navigation_timeout_secs: DEFAULT_NAVIGATION_TIMEOUT_SECS,
                selector_timeout_secs: DEFAULT_SELECTOR_TIMEOUT_SECS,
                playlist_wait_secs: DEFAULT_PLAYLIST_WAIT_SECS,
            },
            gc: GcConfig {
                retention_hours: DEFAULT_RETENTION_HOURS,
                stall_minutes: DEFAULT_STALL_MINUTES,
                daily_sweep_cron: DEFAULT_DAILY_SWEEP_CRON.to_string(),
                stall_sweep_interval_secs: DEFAULT_STALL_SWEEP_INTERVAL_SECS,
                disk_sweep_interval_secs: DEFAULT_DISK_SWEEP_INTERVAL_SECS,
                disk_pressure_threshold: DEFAULT_DISK_PRESSURE_THRESHOLD,
                disk_prune_fraction: DEFAULT_DISK_PRESSURE_PRUNE_FRACTION,
            },
            platforms: PlatformsConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the INI file, then environment
    /// variable overrides.
    pub fn load(ini_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(path) = ini_path {
            config.apply_ini(path)?;
        }
        config.apply_env()?;
        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.web.http_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    /// Merge roster entries and credentials from the INI file.
    ///
    /// Sections are named after platforms; each carries a `streamers` list
    /// (comma-separated) and whatever credentials that platform needs. A
    /// section's presence enables the platform unless `enabled = false`.
    fn apply_ini(&mut self, path: &Path) -> Result<()> {
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        for platform in Platform::ALL {
            let Some(section) = ini.section(Some(platform.as_str())) else {
                continue;
            };
            let roster = self.platforms.roster_mut(platform);
            roster.enabled = section
                .get("enabled")
                .map(|v| parse_bool(v))
                .transpose()?
                .unwrap_or(true);
            if let Some(list) = section.get("streamers") {
                roster.streamers = list
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }

        if let Some(twitch) = ini.section(Some("twitch")) {
            self.credentials.twitch_client_id = twitch.get("client_id").map(str::to_string);
            self.credentials.twitch_client_secret = twitch.get("client_secret").map(str::to_string);
        }
        if let Some(trovo) = ini.section(Some("trovo")) {
            self.credentials.trovo_client_id = trovo.get("client_id").map(str::to_string);
        }
        if let Some(kick) = ini.section(Some("kick")) {
            self.credentials.kick_client_token = kick.get("client_token").map(str::to_string);
        }
        if let Some(upload) = ini.section(Some("upload")) {
            if let Some(endpoint) = upload.get("endpoint") {
                self.upload.endpoint = endpoint.to_string();
            }
        }

        Ok(())
    }

    /// Apply documented environment variable overrides.
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("invalid PORT: {port}"))?;
        }
        if let Ok(interval) = std::env::var("REFRESH_INTERVAL") {
            self.refresh.interval_secs = parse_seconds(&interval)
                .with_context(|| format!("invalid REFRESH_INTERVAL: {interval}"))?;
        }
        if let Ok(max) = std::env::var("MAX_CLIP_DURATION") {
            self.media.max_clip_duration_secs = parse_seconds(&max)
                .with_context(|| format!("invalid MAX_CLIP_DURATION: {max}"))?;
        }
        if let Ok(key) = std::env::var("API_KEY") {
            if !key.is_empty() {
                self.auth.api_key = Some(key);
            }
        }
        if let Ok(endpoint) = std::env::var("UPLOAD_ENDPOINT") {
            if !endpoint.is_empty() {
                self.upload.endpoint = endpoint;
            }
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        for platform in Platform::ALL {
            let var = format!("PLATFORM_{}_ENABLED", platform.as_str().to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                self.platforms.roster_mut(platform).enabled =
                    parse_bool(&value).with_context(|| format!("invalid {var}: {value}"))?;
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected boolean, got {other:?}"),
    }
}

/// Accepts plain seconds ("60") or humantime strings ("1m", "90s").
fn parse_seconds(value: &str) -> Result<u64> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Ok(secs);
    }
    let duration = humantime::parse_duration(value.trim())?;
    Ok(duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.refresh.interval_secs, 60);
        assert_eq!(config.media.max_clip_duration_secs, 240);
        assert_eq!(config.refresh.api_concurrency, 5);
        assert!(config.platforms.active().is_empty());
    }

    #[test]
    fn ini_roster_and_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[twitch]\nclient_id = abc\nclient_secret = shh\nstreamers = kaicenat, dankquan\n\n\
             [kick]\nstreamers = waxiest\n\n\
             [youtube]\nenabled = false\nstreamers = UCx"
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_ini(file.path()).unwrap();

        assert_eq!(
            config.platforms.twitch.streamers,
            vec!["kaicenat", "dankquan"]
        );
        assert!(config.platforms.twitch.enabled);
        assert!(config.platforms.kick.enabled);
        assert!(!config.platforms.youtube.enabled);
        assert_eq!(config.credentials.twitch_client_id.as_deref(), Some("abc"));
        assert_eq!(
            config.platforms.active(),
            vec![Platform::Twitch, Platform::Kick]
        );
    }

    #[test]
    fn parse_seconds_accepts_humantime() {
        assert_eq!(parse_seconds("60").unwrap(), 60);
        assert_eq!(parse_seconds("2m").unwrap(), 120);
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn storage_layout_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/var/lib/sc"),
        };
        assert_eq!(storage.temp_dir(), PathBuf::from("/var/lib/sc/temp"));
        assert_eq!(storage.clips_dir(), PathBuf::from("/var/lib/sc/clips"));
        assert_eq!(storage.catalog_path(), PathBuf::from("/var/lib/sc/catalog.json"));
    }
}
