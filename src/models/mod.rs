//! Core data model: platforms, streamer records, catalog snapshots.
//!
//! Records are produced by the platform adapters once per poll cycle and are
//! never mutated afterwards; a new poll supplants the old record wholesale.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The platforms the service knows how to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Parti,
    DLive,
    Trovo,
    Twitch,
    Kick,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Parti,
        Platform::DLive,
        Platform::Trovo,
        Platform::Twitch,
        Platform::Kick,
        Platform::YouTube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Parti => "parti",
            Platform::DLive => "dlive",
            Platform::Trovo => "trovo",
            Platform::Twitch => "twitch",
            Platform::Kick => "kick",
            Platform::YouTube => "youtube",
        }
    }

    /// Whether the platform is polled through the shared headless browser
    /// rather than an HTTP API.
    pub fn is_scraped(&self) -> bool {
        matches!(self, Platform::Kick | Platform::YouTube)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parti" => Ok(Platform::Parti),
            "dlive" => Ok(Platform::DLive),
            "trovo" => Ok(Platform::Trovo),
            "twitch" => Ok(Platform::Twitch),
            "kick" => Ok(Platform::Kick),
            "youtube" | "yt" => Ok(Platform::YouTube),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

/// A roster entry: the platform-native identifier of one streamer.
///
/// Numeric user ids for Parti, login names for Twitch/DLive/Kick, channel ids
/// for YouTube and Trovo. The service treats them as opaque keys.
pub type StreamerRef = String;

/// Live/offline state of one streamer at poll time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamerStatus {
    Live {
        title: String,
        viewer_count: u32,
        started_at: DateTime<Utc>,
    },
    Offline {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_broadcast_at: Option<DateTime<Utc>>,
    },
    /// The scrape target page does not exist.
    NotFound,
    Error {
        reason: String,
    },
}

impl StreamerStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, StreamerStatus::Live { .. })
    }
}

/// One streamer's normalized state for one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerRecord {
    pub platform: Platform,
    pub platform_id: StreamerRef,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub channel_url: String,
    #[serde(flatten)]
    pub status: StreamerStatus,
    pub last_checked: DateTime<Utc>,
    /// Partial-failure annotation: core fields are usable but some secondary
    /// call failed (e.g. profile fetch, last-broadcast lookup).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Media playlist URL observed at poll time, when the platform exposes
    /// one cheaply. Used as the fast path for stream-URL resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl StreamerRecord {
    pub fn new(platform: Platform, platform_id: impl Into<StreamerRef>) -> Self {
        let platform_id = platform_id.into();
        Self {
            channel_url: channel_url(platform, &platform_id),
            display_name: platform_id.clone(),
            platform,
            platform_id,
            avatar_url: None,
            status: StreamerStatus::Offline {
                last_broadcast_at: None,
            },
            last_checked: Utc::now(),
            error_details: None,
            stream_url: None,
        }
    }

    /// Record for a streamer whose fetch failed outright.
    pub fn error(platform: Platform, platform_id: impl Into<StreamerRef>, reason: impl Into<String>) -> Self {
        let mut record = Self::new(platform, platform_id);
        record.status = StreamerStatus::Error {
            reason: reason.into(),
        };
        record
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn viewer_count(&self) -> u32 {
        match &self.status {
            StreamerStatus::Live { viewer_count, .. } => *viewer_count,
            _ => 0,
        }
    }

    fn last_broadcast_or_epoch(&self) -> DateTime<Utc> {
        match &self.status {
            StreamerStatus::Offline {
                last_broadcast_at: Some(at),
            } => *at,
            _ => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// The canonical watch-page URL for a roster entry.
pub fn channel_url(platform: Platform, id: &str) -> String {
    match platform {
        Platform::Parti => format!("https://parti.com/creator/{id}"),
        Platform::DLive => format!("https://dlive.tv/{id}"),
        Platform::Trovo => format!("https://trovo.live/s/{id}"),
        Platform::Twitch => format!("https://www.twitch.tv/{id}"),
        Platform::Kick => format!("https://kick.com/{id}"),
        Platform::YouTube => format!("https://www.youtube.com/channel/{id}/live"),
    }
}

/// Total order over catalog records.
///
/// Live before not-live; live by viewer count descending; not-live by last
/// broadcast descending (absent treated as epoch); ties broken by
/// `(platform, platform_id)` ascending.
pub fn catalog_order(a: &StreamerRecord, b: &StreamerRecord) -> Ordering {
    let class = |r: &StreamerRecord| if r.is_live() { 0u8 } else { 1u8 };
    class(a)
        .cmp(&class(b))
        .then_with(|| b.viewer_count().cmp(&a.viewer_count()))
        .then_with(|| b.last_broadcast_or_epoch().cmp(&a.last_broadcast_or_epoch()))
        .then_with(|| {
            (a.platform.as_str(), a.platform_id.as_str())
                .cmp(&(b.platform.as_str(), b.platform_id.as_str()))
        })
}

/// An ordered, immutable view of the whole roster at one refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub generated_at: Option<DateTime<Utc>>,
    pub streamers: Vec<StreamerRecord>,
}

impl CatalogSnapshot {
    pub fn new(mut streamers: Vec<StreamerRecord>) -> Self {
        streamers.sort_by(catalog_order);
        Self {
            generated_at: Some(Utc::now()),
            streamers,
        }
    }

    pub fn live(&self) -> impl Iterator<Item = &StreamerRecord> {
        self.streamers.iter().filter(|r| r.is_live())
    }

    pub fn platform(&self, platform: Platform) -> impl Iterator<Item = &StreamerRecord> {
        self.streamers.iter().filter(move |r| r.platform == platform)
    }

    pub fn find(&self, platform: Platform, id: &str) -> Option<&StreamerRecord> {
        self.streamers
            .iter()
            .find(|r| r.platform == platform && r.platform_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn live(platform: Platform, id: &str, viewers: u32) -> StreamerRecord {
        let mut r = StreamerRecord::new(platform, id);
        r.status = StreamerStatus::Live {
            title: "t".into(),
            viewer_count: viewers,
            started_at: Utc::now(),
        };
        r
    }

    fn offline(platform: Platform, id: &str, last: Option<DateTime<Utc>>) -> StreamerRecord {
        let mut r = StreamerRecord::new(platform, id);
        r.status = StreamerStatus::Offline {
            last_broadcast_at: last,
        };
        r
    }

    #[test]
    fn platform_round_trip() {
        for p in Platform::ALL {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
        assert!("mixer".parse::<Platform>().is_err());
    }

    #[test]
    fn live_sorts_before_offline() {
        let a = offline(Platform::Twitch, "a", Some(Utc::now()));
        let b = live(Platform::Kick, "b", 1);
        assert_eq!(catalog_order(&b, &a), Ordering::Less);
        assert_eq!(catalog_order(&a, &b), Ordering::Greater);
    }

    #[test]
    fn live_sorted_by_viewers_descending_across_platforms() {
        let a = live(Platform::Twitch, "big", 1000);
        let b = live(Platform::Kick, "small", 999);
        assert_eq!(catalog_order(&a, &b), Ordering::Less);
    }

    #[test]
    fn offline_sorted_by_recency_with_absent_as_epoch() {
        let recent = offline(
            Platform::Twitch,
            "recent",
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
        );
        let older = offline(
            Platform::Twitch,
            "older",
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()),
        );
        let never = offline(Platform::Twitch, "never", None);
        assert_eq!(catalog_order(&recent, &older), Ordering::Less);
        assert_eq!(catalog_order(&older, &never), Ordering::Less);
    }

    #[test]
    fn ties_break_on_platform_then_id() {
        let a = offline(Platform::Kick, "x", None);
        let b = offline(Platform::Twitch, "x", None);
        assert_eq!(catalog_order(&a, &b), Ordering::Less);

        let c = offline(Platform::Kick, "a", None);
        let d = offline(Platform::Kick, "b", None);
        assert_eq!(catalog_order(&c, &d), Ordering::Less);
    }

    #[test]
    fn not_found_and_error_sort_with_offline_never_broadcast() {
        let mut nf = StreamerRecord::new(Platform::Kick, "ghost");
        nf.status = StreamerStatus::NotFound;
        let off = offline(Platform::Kick, "off", Some(Utc::now()));
        assert_eq!(catalog_order(&off, &nf), Ordering::Less);
    }

    #[test]
    fn snapshot_constructor_sorts() {
        let snap = CatalogSnapshot::new(vec![
            offline(Platform::Twitch, "z", None),
            live(Platform::Parti, "1", 5),
            live(Platform::Kick, "big", 500),
        ]);
        let ids: Vec<_> = snap.streamers.iter().map(|r| r.platform_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "1", "z"]);
    }

    #[test]
    fn record_json_carries_platform_and_tagged_status() {
        let r = live(Platform::Twitch, "kai", 42);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["platform"], "twitch");
        assert_eq!(v["state"], "live");
        assert_eq!(v["viewer_count"], 42);
    }
}
