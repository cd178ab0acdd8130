//! Persisted catalog snapshots
//!
//! The latest snapshot is written atomically (write-to-temp then rename) to
//! a well-known JSON path so it survives restart and so concurrent readers
//! never observe a truncated document. Only the aggregator writes; everyone
//! else reads.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::models::{CatalogSnapshot, Platform, StreamerRecord};

#[derive(Clone)]
pub struct CatalogStore {
    path: PathBuf,
    latest: Arc<RwLock<CatalogSnapshot>>,
}

impl CatalogStore {
    /// Open the store, loading any snapshot persisted by a previous run.
    pub fn open(path: PathBuf) -> Self {
        let latest = match Self::read_file(&path) {
            Ok(Some(snapshot)) => {
                debug!(
                    path = %path.display(),
                    records = snapshot.streamers.len(),
                    "loaded persisted catalog"
                );
                snapshot
            }
            Ok(None) => CatalogSnapshot::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to load persisted catalog, starting empty");
                CatalogSnapshot::default()
            }
        };
        Self {
            path,
            latest: Arc::new(RwLock::new(latest)),
        }
    }

    /// The most recent snapshot (persisted or published this run).
    pub fn latest(&self) -> CatalogSnapshot {
        self.latest.read().expect("catalog lock poisoned").clone()
    }

    /// Records for one platform from the latest snapshot. Used as fallback
    /// when a platform's refresh fails wholesale.
    pub fn platform_records(&self, platform: Platform) -> Vec<StreamerRecord> {
        self.latest
            .read()
            .expect("catalog lock poisoned")
            .platform(platform)
            .cloned()
            .collect()
    }

    /// Atomically replace the snapshot on disk and in memory.
    pub fn publish(&self, snapshot: CatalogSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(&snapshot).context("serialize catalog")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;

        *self.latest.write().expect("catalog lock poisoned") = snapshot;
        Ok(())
    }

    fn read_file(path: &PathBuf) -> Result<Option<CatalogSnapshot>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamerStatus;

    #[test]
    fn publish_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let store = CatalogStore::open(path.clone());
        assert!(store.latest().streamers.is_empty());

        let mut record = StreamerRecord::new(Platform::Twitch, "kai");
        record.status = StreamerStatus::Live {
            title: "hi".into(),
            viewer_count: 9,
            started_at: chrono::Utc::now(),
        };
        store.publish(CatalogSnapshot::new(vec![record])).unwrap();

        let reopened = CatalogStore::open(path);
        assert_eq!(reopened.latest().streamers.len(), 1);
        assert!(reopened.latest().streamers[0].is_live());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let store = CatalogStore::open(path.clone());
        store.publish(CatalogSnapshot::new(vec![])).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["catalog.json".to_string()]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = CatalogStore::open(path);
        assert!(store.latest().streamers.is_empty());
    }
}
