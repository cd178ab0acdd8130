//! Catalog aggregator
//!
//! Fans one refresh out across all active platform adapters, merges the
//! results into a sorted snapshot, persists it atomically and publishes it on
//! the event bus. All-settled semantics: a platform that fails wholesale
//! contributes its entries from the previous persisted snapshot instead of
//! dropping off the catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::adapters::PlatformAdapter;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::events::{BusEvent, EventBus};
use crate::models::{CatalogSnapshot, Platform, StreamerRecord};

#[derive(Clone)]
pub struct CatalogAggregator {
    adapters: Arc<HashMap<Platform, Arc<dyn PlatformAdapter>>>,
    rosters: Arc<HashMap<Platform, Vec<String>>>,
    store: CatalogStore,
    bus: EventBus,
    api_concurrency: usize,
    streamer_timeout: Duration,
    platform_timeout: Duration,
    /// Held for the duration of one refresh; concurrent triggers are dropped.
    refresh_guard: Arc<tokio::sync::Mutex<()>>,
}

impl CatalogAggregator {
    pub fn new(
        config: &Config,
        adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
        store: CatalogStore,
        bus: EventBus,
    ) -> Self {
        let rosters = adapters
            .keys()
            .map(|p| (*p, config.platforms.roster(*p).streamers.clone()))
            .collect();
        Self {
            adapters: Arc::new(adapters),
            rosters: Arc::new(rosters),
            store,
            bus,
            api_concurrency: config.refresh.api_concurrency,
            streamer_timeout: Duration::from_secs(config.refresh.streamer_timeout_secs),
            platform_timeout: Duration::from_secs(config.refresh.platform_timeout_secs),
            refresh_guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Refresh every platform. Returns `None` when a refresh is already in
    /// flight — overlapping refreshes are dropped, never queued.
    pub async fn refresh(&self) -> Result<Option<CatalogSnapshot>> {
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            debug!("refresh already running, dropping trigger");
            return Ok(None);
        };

        let started = std::time::Instant::now();
        let platforms: Vec<Platform> = self.adapters.keys().copied().collect();

        let results = futures::future::join_all(
            platforms
                .iter()
                .map(|platform| self.collect_platform(*platform)),
        )
        .await;

        let mut records = Vec::new();
        for (platform, result) in platforms.iter().zip(results) {
            match result {
                Some(mut platform_records) => records.append(&mut platform_records),
                None => {
                    // Whole-platform failure: fall back to the previous
                    // snapshot so the catalog never collapses.
                    let fallback = self.store.platform_records(*platform);
                    if fallback.is_empty() {
                        warn!(platform = %platform, "platform failed with no prior snapshot to fall back on");
                    } else {
                        warn!(
                            platform = %platform,
                            records = fallback.len(),
                            "platform failed, reusing prior snapshot entries"
                        );
                        records.extend(fallback);
                    }
                }
            }
        }

        let snapshot = CatalogSnapshot::new(records);
        self.store.publish(snapshot.clone())?;
        self.bus.publish(BusEvent::CatalogSnapshot(snapshot.clone()));
        info!(
            records = snapshot.streamers.len(),
            live = snapshot.live().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "catalog refreshed"
        );
        Ok(Some(snapshot))
    }

    /// Refresh a single platform, splicing its fresh records into the latest
    /// snapshot. Used by the scoped refresh endpoint.
    pub async fn refresh_platform(&self, platform: Platform) -> Result<Option<CatalogSnapshot>> {
        if !self.adapters.contains_key(&platform) {
            anyhow::bail!("platform {platform} is not active");
        }
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            debug!(platform = %platform, "refresh already running, dropping scoped trigger");
            return Ok(None);
        };

        let fresh = match self.collect_platform(platform).await {
            Some(records) => records,
            None => {
                warn!(platform = %platform, "scoped refresh failed, keeping prior entries");
                return Ok(None);
            }
        };

        let mut records: Vec<StreamerRecord> = self
            .store
            .latest()
            .streamers
            .into_iter()
            .filter(|r| r.platform != platform)
            .collect();
        records.extend(fresh);

        let snapshot = CatalogSnapshot::new(records);
        self.store.publish(snapshot.clone())?;
        self.bus.publish(BusEvent::CatalogSnapshot(snapshot.clone()));
        Ok(Some(snapshot))
    }

    /// Fetch one platform's roster. `None` signals whole-platform failure;
    /// per-streamer failures are already absorbed into `Error` records.
    async fn collect_platform(&self, platform: Platform) -> Option<Vec<StreamerRecord>> {
        let adapter = self.adapters.get(&platform)?.clone();
        let refs = self.rosters.get(&platform)?.clone();
        if refs.is_empty() {
            return Some(Vec::new());
        }

        let work = async {
            // Batch-capable adapters (OAuth chunking) take the whole roster.
            if let Some(records) = adapter.fetch_batch(&refs).await {
                return records;
            }

            if platform.is_scraped() {
                // One browser session per platform; streamers in sequence.
                let mut records = Vec::with_capacity(refs.len());
                for r in &refs {
                    records.push(self.fetch_one(&*adapter, platform, r).await);
                }
                records
            } else {
                stream::iter(refs.iter().cloned())
                    .map(|r| {
                        let adapter = adapter.clone();
                        async move { self.fetch_one(&*adapter, platform, &r).await }
                    })
                    .buffer_unordered(self.api_concurrency)
                    .collect()
                    .await
            }
        };

        match tokio::time::timeout(self.platform_timeout, work).await {
            Ok(records) => Some(records),
            Err(_) => {
                warn!(platform = %platform, timeout = ?self.platform_timeout, "platform refresh timed out");
                None
            }
        }
    }

    async fn fetch_one(
        &self,
        adapter: &dyn PlatformAdapter,
        platform: Platform,
        streamer_ref: &str,
    ) -> StreamerRecord {
        match tokio::time::timeout(self.streamer_timeout, adapter.fetch(streamer_ref)).await {
            Ok(record) => record,
            Err(_) => StreamerRecord::error(
                platform,
                streamer_ref,
                format!("fetch exceeded {}s cap", self.streamer_timeout.as_secs()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use crate::models::StreamerStatus;

    /// Scripted adapter for aggregator tests.
    struct ScriptedAdapter {
        platform: Platform,
        records: HashMap<String, StreamerRecord>,
        hang: bool,
    }

    #[async_trait]
    impl PlatformAdapter for ScriptedAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
            if self.hang {
                futures::future::pending::<()>().await;
            }
            self.records
                .get(streamer_ref)
                .cloned()
                .unwrap_or_else(|| StreamerRecord::error(self.platform, streamer_ref, "unscripted"))
        }
    }

    fn live_record(platform: Platform, id: &str, viewers: u32) -> StreamerRecord {
        let mut r = StreamerRecord::new(platform, id);
        r.status = StreamerStatus::Live {
            title: format!("{id} live"),
            viewer_count: viewers,
            started_at: Utc::now(),
        };
        r
    }

    fn offline_record(platform: Platform, id: &str, hours_ago: i64) -> StreamerRecord {
        let mut r = StreamerRecord::new(platform, id);
        r.status = StreamerStatus::Offline {
            last_broadcast_at: Some(Utc::now() - ChronoDuration::hours(hours_ago)),
        };
        r
    }

    fn test_config(rosters: &[(Platform, &[&str])]) -> Config {
        let mut config = Config::default();
        config.refresh.platform_timeout_secs = 2;
        config.refresh.streamer_timeout_secs = 1;
        for (platform, refs) in rosters {
            let roster = match platform {
                Platform::Parti => &mut config.platforms.parti,
                Platform::DLive => &mut config.platforms.dlive,
                Platform::Trovo => &mut config.platforms.trovo,
                Platform::Twitch => &mut config.platforms.twitch,
                Platform::Kick => &mut config.platforms.kick,
                Platform::YouTube => &mut config.platforms.youtube,
            };
            roster.enabled = true;
            roster.streamers = refs.iter().map(|s| s.to_string()).collect();
        }
        config
    }

    fn scripted(
        platform: Platform,
        records: Vec<StreamerRecord>,
        hang: bool,
    ) -> Arc<dyn PlatformAdapter> {
        Arc::new(ScriptedAdapter {
            platform,
            records: records
                .into_iter()
                .map(|r| (r.platform_id.clone(), r))
                .collect(),
            hang,
        })
    }

    #[tokio::test]
    async fn refresh_merges_and_sorts_across_platforms() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.json"));
        let config = test_config(&[
            (Platform::Parti, &["1", "2"]),
            (Platform::Kick, &["ghost"]),
        ]);

        let mut not_found = StreamerRecord::new(Platform::Kick, "ghost");
        not_found.status = StreamerStatus::NotFound;

        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert(
            Platform::Parti,
            scripted(
                Platform::Parti,
                vec![
                    live_record(Platform::Parti, "1", 500),
                    offline_record(Platform::Parti, "2", 1),
                ],
                false,
            ),
        );
        adapters.insert(Platform::Kick, scripted(Platform::Kick, vec![not_found], false));

        let aggregator = CatalogAggregator::new(&config, adapters, store, EventBus::new());
        let snapshot = aggregator.refresh().await.unwrap().unwrap();

        let ids: Vec<&str> = snapshot
            .streamers
            .iter()
            .map(|r| r.platform_id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2", "ghost"]);
        assert!(matches!(
            snapshot.streamers[2].status,
            StreamerStatus::NotFound
        ));
    }

    #[tokio::test]
    async fn higher_viewer_count_wins_across_platforms() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.json"));
        let config = test_config(&[
            (Platform::Parti, &["a"]),
            (Platform::Trovo, &["b"]),
        ]);

        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert(
            Platform::Parti,
            scripted(Platform::Parti, vec![live_record(Platform::Parti, "a", 1000)], false),
        );
        adapters.insert(
            Platform::Trovo,
            scripted(Platform::Trovo, vec![live_record(Platform::Trovo, "b", 999)], false),
        );

        let aggregator = CatalogAggregator::new(&config, adapters, store, EventBus::new());
        let snapshot = aggregator.refresh().await.unwrap().unwrap();
        assert_eq!(snapshot.streamers[0].platform_id, "a");
        assert_eq!(snapshot.streamers[1].platform_id, "b");
    }

    #[tokio::test]
    async fn failed_platform_falls_back_to_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.json"));

        // Seed the store with a prior snapshot carrying a parti record.
        store
            .publish(CatalogSnapshot::new(vec![offline_record(
                Platform::Parti,
                "1",
                2,
            )]))
            .unwrap();

        let mut config = test_config(&[
            (Platform::Parti, &["1"]),
            (Platform::Trovo, &["b"]),
        ]);
        // Per-streamer cap larger than the platform cap so the hang registers
        // as a whole-platform failure.
        config.refresh.streamer_timeout_secs = 30;
        config.refresh.platform_timeout_secs = 1;

        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        // Parti hangs past the platform timeout.
        adapters.insert(Platform::Parti, scripted(Platform::Parti, vec![], true));
        adapters.insert(
            Platform::Trovo,
            scripted(Platform::Trovo, vec![live_record(Platform::Trovo, "b", 3)], false),
        );

        let aggregator = CatalogAggregator::new(&config, adapters, store, EventBus::new());
        let snapshot = aggregator.refresh().await.unwrap().unwrap();

        assert_eq!(snapshot.streamers.len(), 2);
        let parti = snapshot.find(Platform::Parti, "1").unwrap();
        assert!(
            matches!(parti.status, StreamerStatus::Offline { .. }),
            "fallback entry should come from the persisted snapshot"
        );
        assert!(snapshot.find(Platform::Trovo, "b").is_some());
    }

    #[tokio::test]
    async fn per_streamer_timeout_yields_error_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.json"));
        let mut config = test_config(&[(Platform::Parti, &["slow"])]);
        config.refresh.streamer_timeout_secs = 1;
        config.refresh.platform_timeout_secs = 30;

        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        adapters.insert(Platform::Parti, scripted(Platform::Parti, vec![], true));

        let aggregator = CatalogAggregator::new(&config, adapters, store, EventBus::new());
        let snapshot = aggregator.refresh().await.unwrap().unwrap();
        assert_eq!(snapshot.streamers.len(), 1);
        assert!(matches!(
            snapshot.streamers[0].status,
            StreamerStatus::Error { .. }
        ));
    }
}
