//! Parti adapter
//!
//! Two JSON endpoints per streamer: livestream channel info (live flag,
//! viewer count, event name, playback URL) and the user profile (display
//! name, avatar). Either call may fail independently; whatever succeeded is
//! kept and the failure is recorded in `error_details`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::adapters::PlatformAdapter;
use crate::errors::AppResult;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::HttpClientFactory;

const LIVESTREAM_URL: &str =
    "https://api-backend.parti.com/parti_v2/profile/get_livestream_channel_info";
const PROFILE_URL: &str = "https://api-backend.parti.com/parti_v2/profile/user_profile";

#[derive(Debug, Deserialize)]
struct LivestreamInfo {
    #[serde(default)]
    is_streaming_live_now: bool,
    channel_info: Option<ChannelInfo>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    stream: Option<StreamInfo>,
    livestream_event_info: Option<EventInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    viewer_count: Option<u32>,
    playback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventInfo {
    event_name: Option<String>,
    event_start_ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    user_name: Option<String>,
    avatar_link: Option<String>,
    /// Unix seconds of the most recent finished livestream, absent for
    /// accounts that never broadcast.
    most_recent_livestream_ended_ts: Option<i64>,
}

pub struct PartiAdapter {
    client: Client,
}

impl PartiAdapter {
    pub fn new(http: &HttpClientFactory) -> AppResult<Self> {
        Ok(Self {
            client: http.api_client()?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, String> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| format!("decode failed: {e}"))
    }
}

#[async_trait]
impl PlatformAdapter for PartiAdapter {
    fn platform(&self) -> Platform {
        Platform::Parti
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let mut record = StreamerRecord::new(Platform::Parti, streamer_ref);

        let livestream = self
            .get_json::<LivestreamInfo>(format!("{LIVESTREAM_URL}/{streamer_ref}"))
            .await;
        let profile = self
            .get_json::<UserProfile>(format!("{PROFILE_URL}/{streamer_ref}"))
            .await;

        let mut errors: Vec<String> = Vec::new();

        let mut last_broadcast: Option<DateTime<Utc>> = None;
        match &profile {
            Ok(profile) => {
                if let Some(name) = &profile.user_name {
                    record.display_name = name.clone();
                }
                record.avatar_url = profile.avatar_link.clone();
                last_broadcast = profile
                    .most_recent_livestream_ended_ts
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
            }
            Err(err) => errors.push(format!("profile: {err}")),
        }

        match livestream {
            Ok(info) if info.is_streaming_live_now => {
                let stream = info.channel_info.as_ref().and_then(|c| c.stream.as_ref());
                let event = info
                    .channel_info
                    .as_ref()
                    .and_then(|c| c.livestream_event_info.as_ref());
                record.stream_url = stream.and_then(|s| s.playback_url.clone());
                record.status = StreamerStatus::Live {
                    title: event
                        .and_then(|e| e.event_name.clone())
                        .unwrap_or_default(),
                    viewer_count: stream.and_then(|s| s.viewer_count).unwrap_or(0),
                    started_at: event
                        .and_then(|e| e.event_start_ts)
                        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                        .unwrap_or_else(Utc::now),
                };
            }
            Ok(_) => {
                record.status = StreamerStatus::Offline {
                    last_broadcast_at: last_broadcast,
                };
            }
            Err(err) => {
                errors.push(format!("livestream: {err}"));
                // Profile may still have succeeded; keep the record usable.
                record.status = if profile.is_ok() {
                    StreamerStatus::Offline {
                        last_broadcast_at: last_broadcast,
                    }
                } else {
                    StreamerStatus::Error {
                        reason: errors.join("; "),
                    }
                };
            }
        }

        if !errors.is_empty() {
            debug!(streamer = streamer_ref, details = %errors.join("; "), "parti fetch degraded");
            record.error_details = Some(errors.join("; "));
        }
        record.last_checked = Utc::now();
        record
    }
}
