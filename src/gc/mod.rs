//! Garbage collector
//!
//! Three sweeps keep the disk and the job registry bounded:
//! - daily: temp buffers, preview directories and terminal jobs past the
//!   retention window
//! - stall: non-terminal jobs idle past the watchdog limit
//! - disk pressure: oldest finished clips when the filesystem crosses the
//!   usage threshold

use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::Duration;
use sysinfo::Disks;
use tracing::{debug, info, warn};

use crate::config::{GcConfig, StorageConfig};
use crate::jobs::JobBroker;

#[derive(Clone)]
pub struct GarbageCollector {
    broker: JobBroker,
    storage: StorageConfig,
    config: GcConfig,
}

impl GarbageCollector {
    pub fn new(broker: JobBroker, storage: StorageConfig, config: GcConfig) -> Self {
        Self {
            broker,
            storage,
            config,
        }
    }

    /// Daily sweep: drop temp artifacts and terminal jobs older than the
    /// retention window.
    pub fn daily(&self) {
        let retention = StdDuration::from_secs(self.config.retention_hours as u64 * 3600);
        let removed = sweep_dir(&self.storage.temp_dir(), retention);
        if removed > 0 {
            info!(removed, "daily sweep reclaimed temp artifacts");
        }

        let pruned = self
            .broker
            .prune_terminal(Duration::hours(self.config.retention_hours));
        if !pruned.is_empty() {
            info!(jobs = pruned.len(), "daily sweep pruned terminal jobs");
        }
    }

    /// Watchdog sweep: force-fail jobs stuck mid-pipeline.
    pub fn stall_sweep(&self) {
        let swept = self
            .broker
            .sweep_stalled(Duration::minutes(self.config.stall_minutes));
        if !swept.is_empty() {
            warn!(jobs = swept.len(), "stall sweep force-failed idle jobs");
        }
    }

    /// Disk-pressure sweep: while the clips filesystem is over the usage
    /// threshold, delete the oldest fraction of finished clips (and their
    /// thumbnails) by creation time.
    pub fn disk_pressure_sweep(&self) {
        // Bounded iterations in case deletion cannot reduce usage (e.g. the
        // disk is filled by something else entirely).
        for _ in 0..16 {
            let Some(usage) = disk_usage_fraction(&self.storage.clips_dir()) else {
                debug!("disk usage unavailable, skipping pressure sweep");
                return;
            };
            if usage <= self.config.disk_pressure_threshold {
                return;
            }
            warn!(
                usage = format!("{:.0}%", usage * 100.0),
                "disk pressure, pruning oldest clips"
            );
            match self.prune_oldest_clips(self.config.disk_prune_fraction) {
                Ok(removed) if removed.is_empty() => {
                    warn!("disk still under pressure but no clips left to prune");
                    return;
                }
                Ok(removed) => {
                    info!(clips = removed.len(), "pressure sweep removed clips");
                }
                Err(err) => {
                    warn!(%err, "pressure sweep failed");
                    return;
                }
            }
        }
    }

    /// Delete the oldest `fraction` of clip files by creation time, along
    /// with their thumbnails. Returns the removed clip paths.
    pub fn prune_oldest_clips(&self, fraction: f64) -> std::io::Result<Vec<PathBuf>> {
        let mut clips: Vec<(SystemTime, PathBuf)> = std::fs::read_dir(self.storage.clips_dir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "mp4"))
            .filter_map(|path| {
                // Clips are written once, so mtime is their creation time on
                // every platform; btime is not portably available.
                let meta = std::fs::metadata(&path).ok()?;
                let created = meta.modified().or_else(|_| meta.created()).ok()?;
                Some((created, path))
            })
            .collect();
        if clips.is_empty() {
            return Ok(Vec::new());
        }

        clips.sort_by_key(|(created, _)| *created);
        let count = ((clips.len() as f64 * fraction).ceil() as usize).max(1);

        let mut removed = Vec::with_capacity(count);
        for (_, clip) in clips.into_iter().take(count) {
            if let Err(err) = std::fs::remove_file(&clip) {
                warn!(path = %clip.display(), %err, "failed to remove clip");
                continue;
            }
            if let Some(stem) = clip.file_stem() {
                let thumbnail = self
                    .storage
                    .thumbnails_dir()
                    .join(format!("{}.jpg", stem.to_string_lossy()));
                let _ = std::fs::remove_file(thumbnail);
            }
            removed.push(clip);
        }
        Ok(removed)
    }
}

/// Remove entries (files and directories) older than `retention` from `dir`.
fn sweep_dir(dir: &Path, retention: StdDuration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let cutoff = SystemTime::now() - retention;
    let mut removed = 0;

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified >= cutoff {
            continue;
        }
        let result = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "swept expired artifact");
                removed += 1;
            }
            Err(err) => warn!(path = %path.display(), %err, "sweep failed"),
        }
    }
    removed
}

/// Used fraction of the filesystem holding `path`, from the longest matching
/// mount point.
fn disk_usage_fraction(path: &Path) -> Option<f64> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let total = disk.total_space();
    if total == 0 {
        return None;
    }
    Some(1.0 - disk.available_space() as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn gc_with_dir(dir: &Path) -> GarbageCollector {
        let storage = StorageConfig {
            data_dir: dir.to_path_buf(),
        };
        storage.ensure_layout().unwrap();
        GarbageCollector::new(
            JobBroker::new(EventBus::new()),
            storage,
            crate::config::Config::default().gc,
        )
    }

    #[test]
    fn prune_removes_oldest_tenth_and_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let gc = gc_with_dir(dir.path());
        let clips_dir = dir.path().join("clips");
        let thumbs_dir = dir.path().join("thumbnails");

        // 20 clips with strictly increasing mtimes.
        for i in 0..20 {
            let clip = clips_dir.join(format!("clip{i:02}.mp4"));
            std::fs::write(&clip, b"x").unwrap();
            std::fs::write(thumbs_dir.join(format!("clip{i:02}.jpg")), b"t").unwrap();
            let t = filetime_from_secs(1_700_000_000 + i * 60);
            set_file_mtime(&clip, t);
        }

        let removed = gc.prune_oldest_clips(0.10).unwrap();
        assert_eq!(removed.len(), 2);

        // The two oldest are gone, clip02 onward untouched.
        assert!(!clips_dir.join("clip00.mp4").exists());
        assert!(!clips_dir.join("clip01.mp4").exists());
        assert!(!thumbs_dir.join("clip00.jpg").exists());
        assert!(!thumbs_dir.join("clip01.jpg").exists());
        assert!(clips_dir.join("clip02.mp4").exists());
        assert!(thumbs_dir.join("clip02.jpg").exists());
        assert!(clips_dir.join("clip19.mp4").exists());
    }

    #[test]
    fn prune_on_empty_dir_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let gc = gc_with_dir(dir.path());
        assert!(gc.prune_oldest_clips(0.10).unwrap().is_empty());
    }

    #[test]
    fn daily_sweep_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let gc = gc_with_dir(dir.path());
        let temp = dir.path().join("temp");

        let old_buffer = temp.join("buffer_old.ts");
        std::fs::write(&old_buffer, b"x").unwrap();
        set_file_mtime(&old_buffer, filetime_from_secs(1_000_000));

        let old_previews = temp.join("preview_old");
        std::fs::create_dir_all(&old_previews).unwrap();
        std::fs::write(old_previews.join("frame_001.jpg"), b"f").unwrap();
        set_file_mtime(&old_previews, filetime_from_secs(1_000_000));

        let fresh_buffer = temp.join("buffer_fresh.ts");
        std::fs::write(&fresh_buffer, b"y").unwrap();

        gc.daily();

        assert!(!old_buffer.exists());
        assert!(!old_previews.exists());
        assert!(fresh_buffer.exists());
    }

    fn filetime_from_secs(secs: i64) -> std::time::SystemTime {
        std::time::UNIX_EPOCH + StdDuration::from_secs(secs as u64)
    }

    fn set_file_mtime(path: &Path, time: std::time::SystemTime) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .or_else(|_| std::fs::OpenOptions::new().read(true).open(path))
            .unwrap();
        file.set_modified(time).unwrap();
    }
}
