//! DLive adapter
//!
//! Single GraphQL POST per streamer covering live state, viewer count and the
//! last-streamed timestamp. A null `userByDisplayname` means the account does
//! not exist and maps to `NotFound`.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::adapters::PlatformAdapter;
use crate::errors::AppResult;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::HttpClientFactory;

const GRAPHQL_URL: &str = "https://graphql.dlive.tv/";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    user_by_displayname: Option<DLiveUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DLiveUser {
    displayname: Option<String>,
    avatar: Option<String>,
    livestream: Option<DLiveStream>,
    /// Milliseconds since epoch, as a string.
    last_streamed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DLiveStream {
    title: Option<String>,
    watching_count: Option<u32>,
    created_at: Option<String>,
}

pub struct DLiveAdapter {
    client: Client,
}

impl DLiveAdapter {
    pub fn new(http: &HttpClientFactory) -> AppResult<Self> {
        Ok(Self {
            client: http.api_client()?,
        })
    }

    fn parse_millis(value: Option<&String>) -> Option<chrono::DateTime<Utc>> {
        let millis: i64 = value?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

#[async_trait]
impl PlatformAdapter for DLiveAdapter {
    fn platform(&self) -> Platform {
        Platform::DLive
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let mut record = StreamerRecord::new(Platform::DLive, streamer_ref);
        record.last_checked = Utc::now();

        let query = format!(
            "query {{ userByDisplayname(displayname: \"{}\") {{ \
             displayname avatar lastStreamedAt \
             livestream {{ title watchingCount createdAt }} }} }}",
            streamer_ref.replace('"', "")
        );

        let response = self
            .client
            .post(GRAPHQL_URL)
            .json(&json!({ "query": query }))
            .send()
            .await;

        let body: GraphQlResponse = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(err) => {
                    record.status = StreamerStatus::Error {
                        reason: format!("decode failed: {err}"),
                    };
                    return record;
                }
            },
            Ok(resp) => {
                record.status = StreamerStatus::Error {
                    reason: format!("HTTP {}", resp.status()),
                };
                return record;
            }
            Err(err) => {
                record.status = StreamerStatus::Error {
                    reason: format!("request failed: {err}"),
                };
                return record;
            }
        };

        if !body.errors.is_empty() {
            record.error_details = Some(
                body.errors
                    .iter()
                    .map(|e| e.message.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            );
        }

        let Some(user) = body.data.and_then(|d| d.user_by_displayname) else {
            record.status = StreamerStatus::NotFound;
            return record;
        };

        if let Some(name) = user.displayname.clone() {
            record.display_name = name;
        }
        record.avatar_url = user.avatar.clone();

        record.status = match &user.livestream {
            Some(stream) => StreamerStatus::Live {
                title: stream.title.clone().unwrap_or_default(),
                viewer_count: stream.watching_count.unwrap_or(0),
                started_at: Self::parse_millis(stream.created_at.as_ref())
                    .unwrap_or_else(Utc::now),
            },
            None => StreamerStatus::Offline {
                last_broadcast_at: Self::parse_millis(user.last_streamed_at.as_ref()),
            },
        };
        record
    }
}
