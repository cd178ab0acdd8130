//! Catalog total-order properties: the published order is a function of the
//! records' sort keys, not of their input positions.

use chrono::{Duration, Utc};
use stream_clipper::models::{
    CatalogSnapshot, Platform, StreamerRecord, StreamerStatus,
};

fn live(platform: Platform, id: &str, viewers: u32) -> StreamerRecord {
    let mut r = StreamerRecord::new(platform, id);
    r.status = StreamerStatus::Live {
        title: String::new(),
        viewer_count: viewers,
        started_at: Utc::now(),
    };
    r
}

fn offline(platform: Platform, id: &str, hours_ago: Option<i64>) -> StreamerRecord {
    let mut r = StreamerRecord::new(platform, id);
    r.status = StreamerStatus::Offline {
        last_broadcast_at: hours_ago.map(|h| Utc::now() - Duration::hours(h)),
    };
    r
}

fn fixture() -> Vec<StreamerRecord> {
    vec![
        live(Platform::Twitch, "big", 5000),
        live(Platform::Kick, "mid", 800),
        live(Platform::Parti, "small", 3),
        offline(Platform::Twitch, "recent", Some(1)),
        offline(Platform::YouTube, "lastweek", Some(24 * 7)),
        offline(Platform::DLive, "never", None),
        {
            let mut r = StreamerRecord::new(Platform::Kick, "ghost");
            r.status = StreamerStatus::NotFound;
            r
        },
        {
            let mut r = StreamerRecord::new(Platform::Trovo, "broken");
            r.status = StreamerStatus::Error {
                reason: "HTTP 500".into(),
            };
            r
        },
    ]
}

fn ids(snapshot: &CatalogSnapshot) -> Vec<String> {
    snapshot
        .streamers
        .iter()
        .map(|r| r.platform_id.clone())
        .collect()
}

#[test]
fn order_is_live_by_viewers_then_offline_by_recency() {
    let snapshot = CatalogSnapshot::new(fixture());
    let order = ids(&snapshot);

    // Live block first, viewers descending.
    assert_eq!(&order[..3], &["big", "mid", "small"]);
    // Offline by recency; absent last-broadcast sorts with the epoch floor.
    assert_eq!(&order[3..5], &["recent", "lastweek"]);
    // never/ghost/broken all share the epoch floor; platform/id break the tie.
    let tail: Vec<&str> = order[5..].iter().map(String::as_str).collect();
    assert_eq!(tail, vec!["never", "ghost", "broken"]);
}

/// Swapping input positions never changes the output when sort keys differ.
#[test]
fn order_is_invariant_under_input_permutation() {
    let baseline = ids(&CatalogSnapshot::new(fixture()));

    let mut records = fixture();
    // A few deterministic permutations: rotations and a reversal.
    for rotation in 1..records.len() {
        records.rotate_left(1);
        assert_eq!(
            ids(&CatalogSnapshot::new(records.clone())),
            baseline,
            "rotation {rotation} changed the published order"
        );
    }
    records.reverse();
    assert_eq!(ids(&CatalogSnapshot::new(records)), baseline);
}

#[test]
fn tie_on_all_keys_breaks_by_platform_then_id() {
    let records = vec![
        offline(Platform::YouTube, "b", None),
        offline(Platform::YouTube, "a", None),
        offline(Platform::Kick, "z", None),
    ];
    let snapshot = CatalogSnapshot::new(records);
    assert_eq!(ids(&snapshot), vec!["z", "a", "b"]);
}
