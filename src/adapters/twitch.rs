//! Twitch adapter
//!
//! Helix API behind an app access token (client-credentials grant). The token
//! is cached and refreshed 60 seconds before expiry. Roster lookups are
//! batched: up to 100 logins per users/streams request, with one extra videos
//! call per offline streamer for the last archived broadcast. A failed chunk
//! yields `Error` records for that chunk only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapters::PlatformAdapter;
use crate::errors::AppResult;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::HttpClientFactory;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const USERS_URL: &str = "https://api.twitch.tv/helix/users";
const STREAMS_URL: &str = "https://api.twitch.tv/helix/streams";
const VIDEOS_URL: &str = "https://api.twitch.tv/helix/videos";

/// Helix caps multi-identity queries at 100 per request.
const BATCH_SIZE: usize = 100;
/// Refresh the app token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
    profile_image_url: String,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    user_id: String,
    title: String,
    viewer_count: u32,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HelixVideo {
    created_at: DateTime<Utc>,
}

pub struct TwitchAdapter {
    client: Client,
    client_id: String,
    client_secret: String,
    token: Arc<tokio::sync::Mutex<Option<CachedToken>>>,
}

impl TwitchAdapter {
    pub fn new(
        http: &HttpClientFactory,
        client_id: String,
        client_secret: String,
    ) -> AppResult<Self> {
        Ok(Self {
            client: http.api_client()?,
            client_id,
            client_secret,
            token: Arc::new(tokio::sync::Mutex::new(None)),
        })
    }

    /// Current app token, minting a fresh one when the cached token is within
    /// the refresh margin of expiry.
    async fn access_token(&self) -> Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
        }

        debug!("minting twitch app access token");
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("token request returned HTTP {status}"));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("token decode failed: {e}"))?;

        let token = CachedToken {
            token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        };
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn helix_get<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixPage<T>, String> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Client-Id", &self.client_id)
            .query(query)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response
            .json::<HelixPage<T>>()
            .await
            .map_err(|e| format!("decode failed: {e}"))
    }

    /// One users+streams pass over a single chunk of at most 100 logins.
    async fn fetch_chunk(&self, token: &str, logins: &[String]) -> Result<Vec<StreamerRecord>, String> {
        let login_params: Vec<(&str, &str)> =
            logins.iter().map(|l| ("login", l.as_str())).collect();
        let users: HelixPage<HelixUser> = self.helix_get(token, USERS_URL, &login_params).await?;

        let id_params: Vec<(&str, &str)> = users
            .data
            .iter()
            .map(|u| ("user_id", u.id.as_str()))
            .collect();
        let streams: HelixPage<HelixStream> = if id_params.is_empty() {
            HelixPage { data: Vec::new() }
        } else {
            self.helix_get(token, STREAMS_URL, &id_params).await?
        };

        let mut records = Vec::with_capacity(logins.len());
        for login in logins {
            let Some(user) = users
                .data
                .iter()
                .find(|u| u.login.eq_ignore_ascii_case(login))
            else {
                // Helix silently omits unknown logins from the response.
                let mut record = StreamerRecord::new(Platform::Twitch, login);
                record.status = StreamerStatus::NotFound;
                records.push(record);
                continue;
            };

            let mut record = StreamerRecord::new(Platform::Twitch, login);
            record.display_name = user.display_name.clone();
            record.avatar_url = Some(user.profile_image_url.clone());

            if let Some(stream) = streams.data.iter().find(|s| s.user_id == user.id) {
                record.status = StreamerStatus::Live {
                    title: stream.title.clone(),
                    viewer_count: stream.viewer_count,
                    started_at: stream.started_at,
                };
            } else {
                // Secondary lookup: most recent archived broadcast.
                let last_broadcast_at = match self
                    .helix_get::<HelixVideo>(
                        token,
                        VIDEOS_URL,
                        &[("user_id", user.id.as_str()), ("first", "1"), ("type", "archive")],
                    )
                    .await
                {
                    Ok(videos) => videos.data.first().map(|v| v.created_at),
                    Err(err) => {
                        record.error_details = Some(format!("videos: {err}"));
                        None
                    }
                };
                record.status = StreamerStatus::Offline { last_broadcast_at };
            }
            record.last_checked = Utc::now();
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl PlatformAdapter for TwitchAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let refs = vec![streamer_ref.to_string()];
        self.fetch_batch(&refs)
            .await
            .and_then(|mut records| records.pop())
            .unwrap_or_else(|| {
                StreamerRecord::error(Platform::Twitch, streamer_ref, "empty batch result")
            })
    }

    async fn fetch_batch(&self, refs: &[String]) -> Option<Vec<StreamerRecord>> {
        let token = match self.access_token().await {
            Ok(token) => token,
            Err(err) => {
                // No token means no call can succeed; fail the whole roster.
                warn!(%err, "twitch token unavailable");
                return Some(
                    refs.iter()
                        .map(|r| StreamerRecord::error(Platform::Twitch, r, err.clone()))
                        .collect(),
                );
            }
        };

        let mut records = Vec::with_capacity(refs.len());
        for chunk in refs.chunks(BATCH_SIZE) {
            match self.fetch_chunk(&token, chunk).await {
                Ok(mut chunk_records) => records.append(&mut chunk_records),
                Err(err) => {
                    warn!(%err, size = chunk.len(), "twitch chunk failed");
                    records.extend(
                        chunk
                            .iter()
                            .map(|r| StreamerRecord::error(Platform::Twitch, r, err.clone())),
                    );
                }
            }
        }
        Some(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_honors_refresh_margin() {
        let fresh = CachedToken {
            token: "t".into(),
            expires_at: Utc::now() + Duration::seconds(3600),
        };
        assert!(fresh.is_fresh());

        // Inside the 60 s margin counts as expired.
        let expiring = CachedToken {
            token: "t".into(),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        assert!(!expiring.is_fresh());
    }
}
