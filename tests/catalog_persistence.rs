//! Persisted-catalog atomicity: concurrent readers of the snapshot file must
//! only ever observe complete, parseable documents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use stream_clipper::catalog::CatalogStore;
use stream_clipper::models::{CatalogSnapshot, Platform, StreamerRecord, StreamerStatus};

fn big_record(id: usize) -> StreamerRecord {
    let mut r = StreamerRecord::new(Platform::Twitch, format!("streamer{id}"));
    r.status = StreamerStatus::Live {
        // Payload padding so a torn write would be easy to observe.
        title: "x".repeat(512),
        viewer_count: id as u32,
        started_at: Utc::now(),
    };
    r
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_truncated_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let store = CatalogStore::open(path.clone());

    // Seed so readers always have something to parse.
    store
        .publish(CatalogSnapshot::new(vec![big_record(0)]))
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..3 {
        let path = path.clone();
        let stop = stop.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            let mut parses = 0usize;
            loop {
                let bytes = std::fs::read(&path).expect("snapshot file readable");
                serde_json::from_slice::<CatalogSnapshot>(&bytes)
                    .expect("snapshot must never be truncated");
                parses += 1;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            parses
        }));
    }

    // Writer: repeatedly replace the snapshot with varying sizes.
    for round in 1..=50 {
        let records = (0..round * 4).map(big_record).collect();
        store.publish(CatalogSnapshot::new(records)).unwrap();
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        let parses = reader.await.unwrap();
        assert!(parses > 0, "reader should have parsed at least once");
    }

    // The reopened store sees the final snapshot.
    let reopened = CatalogStore::open(path);
    assert_eq!(reopened.latest().streamers.len(), 200);
}
