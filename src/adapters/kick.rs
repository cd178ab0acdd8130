//! Kick adapter
//!
//! Kick has no public API worth relying on; the adapter drives the shared
//! headless browser through the channel page. Selector misses degrade to
//! defaults instead of failing the record, since the page layout shifts
//! often. Viewer counts arrive as human-formatted text ("1.2k").

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::adapters::PlatformAdapter;
use crate::browser::BrowserManager;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::human_format::{parse_relative_time, parse_viewer_count};

/// Hosts whose images must keep loading for avatar extraction.
const MEDIA_HOSTS: [&'static str; 2] = ["files.kick.com", "images.kick.com"];

const CONTENT_SELECTOR: &str = "#channel-content";
const USERNAME_SELECTOR: &str = "#channel-username";
const AVATAR_LIVE_SELECTOR: &str = "#channel-avatar img";
const AVATAR_OFFLINE_SELECTOR: &str = "#channel-content img.rounded-full";
const LIVE_BADGE_SELECTOR: &str = "#channel-content div.shrink-0 > button > div > span";
const TITLE_SELECTOR: &str =
    "#channel-content div.flex.max-w-full.grow.flex-col.gap-1.overflow-hidden > div.flex.min-w-0.max-w-full.shrink.gap-1.overflow-hidden > span";
const VIEWERS_SELECTOR: &str =
    "#channel-content div.flex.items-center.gap-2.self-end.py-0\\.5 > div > span > span.relative.tabular-nums";
const LAST_BROADCAST_SELECTOR: &str =
    "#channel-content div.flex.max-w-full.grow.flex-col.gap-1.overflow-hidden > span:nth-child(3) > span";

pub struct KickAdapter {
    browser: BrowserManager,
    client_token: Option<String>,
}

impl KickAdapter {
    pub fn new(browser: BrowserManager, client_token: Option<String>) -> Self {
        Self {
            browser,
            client_token,
        }
    }
}

#[async_trait]
impl PlatformAdapter for KickAdapter {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let mut record = StreamerRecord::new(Platform::Kick, streamer_ref);
        record.last_checked = Utc::now();

        let mut guard = match self.browser.open_page().await {
            Ok(guard) => guard,
            Err(err) => {
                record.status = StreamerStatus::Error {
                    reason: format!("browser unavailable: {err}"),
                };
                return record;
            }
        };

        let mut headers = json!({
            "sec-ch-ua": "\"Google Chrome\";v=\"135\", \"Not-A.Brand\";v=\"8\", \"Chromium\";v=\"135\"",
            "sec-ch-ua-mobile": "?0",
            "sec-ch-ua-platform": "\"Windows\"",
        });
        if let Some(token) = &self.client_token {
            headers["x-client-token"] = json!(token);
        }
        if let Err(err) = guard.set_extra_headers(headers).await {
            debug!(%err, "kick: header setup failed, continuing without");
        }
        if let Err(err) = guard.block_static_assets(&MEDIA_HOSTS).await {
            debug!(%err, "kick: request interception unavailable");
        }

        let url = record.channel_url.clone();
        if let Err(err) = guard.navigate(&url, self.browser.navigation_timeout()).await {
            record.status = StreamerStatus::Error {
                reason: format!("navigation failed: {err}"),
            };
            return record;
        }

        // Deterministic not-found check before touching any selector.
        let title = guard.title().await;
        let current = guard.current_url().await.unwrap_or_default();
        if title.contains("404") || current.ends_with("/404") {
            record.status = StreamerStatus::NotFound;
            return record;
        }

        let wait = self.browser.selector_timeout();
        if guard.wait_for_element(CONTENT_SELECTOR, wait * 3).await.is_none() {
            record.status = StreamerStatus::Error {
                reason: "channel content never rendered".to_string(),
            };
            return record;
        }

        if let Some(name) = guard.text_of(USERNAME_SELECTOR, wait).await {
            record.display_name = name;
        }

        let is_live = match guard.text_of(LIVE_BADGE_SELECTOR, wait).await {
            Some(badge) => badge.to_ascii_lowercase().contains("live"),
            None => false,
        };

        record.avatar_url = if is_live {
            guard.attr_of(AVATAR_LIVE_SELECTOR, "src", wait).await
        } else {
            guard.attr_of(AVATAR_OFFLINE_SELECTOR, "src", wait).await
        };

        if is_live {
            let title = guard.text_of(TITLE_SELECTOR, wait).await.unwrap_or_default();
            let viewer_count = guard
                .text_of(VIEWERS_SELECTOR, wait)
                .await
                .map(|text| parse_viewer_count(&text))
                .unwrap_or(0);
            record.status = StreamerStatus::Live {
                title,
                viewer_count,
                // Kick does not expose the start time on the page.
                started_at: Utc::now(),
            };
        } else {
            let last_broadcast_at = match guard.text_of(LAST_BROADCAST_SELECTOR, wait).await {
                Some(text) => parse_relative_time(&text, Utc::now()),
                None => None,
            };
            record.status = StreamerStatus::Offline { last_broadcast_at };
        }

        record
    }
}
