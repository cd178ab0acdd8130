//! Trovo adapter
//!
//! Open-platform API: channel info by id (live flag, title, viewer count),
//! plus a secondary past-streams lookup for the last broadcast time when the
//! channel is offline. Requires a client id header.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::adapters::PlatformAdapter;
use crate::errors::AppResult;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::HttpClientFactory;

const CHANNEL_URL: &str = "https://open-api.trovo.live/openplatform/channels/id";
const PAST_STREAMS_URL: &str = "https://open-api.trovo.live/openplatform/pastlivestreams";

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(default)]
    is_live: bool,
    live_title: Option<String>,
    current_viewers: Option<u32>,
    username: Option<String>,
    profile_pic: Option<String>,
    /// Unix seconds, as a string.
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PastStreams {
    #[serde(default)]
    past_livestream_list: Vec<PastStream>,
}

#[derive(Debug, Deserialize)]
struct PastStream {
    end_ts: Option<String>,
}

pub struct TrovoAdapter {
    client: Client,
    client_id: Option<String>,
}

impl TrovoAdapter {
    pub fn new(http: &HttpClientFactory, client_id: Option<String>) -> AppResult<Self> {
        Ok(Self {
            client: http.api_client()?,
            client_id,
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T, String> {
        let mut request = self.client.post(url).json(&body);
        if let Some(client_id) = &self.client_id {
            request = request.header("Client-ID", client_id);
        }
        let response = request.send().await.map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| format!("decode failed: {e}"))
    }

    fn parse_unix(value: Option<&String>) -> Option<chrono::DateTime<Utc>> {
        let secs: i64 = value?.parse().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

#[async_trait]
impl PlatformAdapter for TrovoAdapter {
    fn platform(&self) -> Platform {
        Platform::Trovo
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let mut record = StreamerRecord::new(Platform::Trovo, streamer_ref);
        record.last_checked = Utc::now();

        let channel = match self
            .post_json::<ChannelInfo>(CHANNEL_URL, json!({ "channel_id": streamer_ref }))
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                record.status = StreamerStatus::Error { reason: err };
                return record;
            }
        };

        if let Some(name) = channel.username.clone() {
            record.display_name = name;
        }
        record.avatar_url = channel.profile_pic.clone();

        if channel.is_live {
            record.status = StreamerStatus::Live {
                title: channel.live_title.unwrap_or_default(),
                viewer_count: channel.current_viewers.unwrap_or(0),
                started_at: Self::parse_unix(channel.started_at.as_ref())
                    .unwrap_or_else(Utc::now),
            };
            return record;
        }

        // Offline: the channel payload has no end time, ask the past-streams
        // endpoint for the most recent one.
        let last_broadcast_at = match self
            .post_json::<PastStreams>(
                PAST_STREAMS_URL,
                json!({ "channel_id": streamer_ref, "limit": 1 }),
            )
            .await
        {
            Ok(past) => past
                .past_livestream_list
                .first()
                .and_then(|s| Self::parse_unix(s.end_ts.as_ref())),
            Err(err) => {
                record.error_details = Some(format!("past streams: {err}"));
                None
            }
        };

        record.status = StreamerStatus::Offline { last_broadcast_at };
        record
    }
}
