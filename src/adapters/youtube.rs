//! YouTube adapter
//!
//! Scrapes the channel's `/live` watch page. A live channel renders the
//! player with a view-count element; otherwise the adapter falls back to the
//! channel home page for the profile fields and the "Streamed N days ago"
//! line of the most recent video.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::adapters::PlatformAdapter;
use crate::browser::BrowserManager;
use crate::models::{Platform, StreamerRecord, StreamerStatus};
use crate::utils::human_format::{parse_relative_time, parse_viewer_count};

const MEDIA_HOSTS: [&'static str; 2] = ["yt3.ggpht.com", "ytimg.com"];

const VIEWER_COUNT_SELECTOR: &str = "#view-count > yt-animated-rolling-number";
const LIVE_USERNAME_SELECTOR: &str = "#text > a";
const LIVE_AVATAR_SELECTOR: &str = "#avatar #img";
const LIVE_TITLE_SELECTOR: &str = "#title > h1 > yt-formatted-string";

const HOME_USERNAME_SELECTOR: &str = "#page-header h1 span";
const HOME_AVATAR_SELECTOR: &str = "#page-header img";
const HOME_LAST_BROADCAST_SELECTOR: &str = "#metadata-line > span:nth-child(4)";

pub struct YouTubeAdapter {
    browser: BrowserManager,
}

impl YouTubeAdapter {
    pub fn new(browser: BrowserManager) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord {
        let mut record = StreamerRecord::new(Platform::YouTube, streamer_ref);
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
        if let Err(err) = guard.block_static_assets(&MEDIA_HOSTS).await {
            debug!(%err, "youtube: request interception unavailable");
        }

        let live_url = record.channel_url.clone();
        if let Err(err) = guard.navigate(&live_url, self.browser.navigation_timeout()).await {
            record.status = StreamerStatus::Error {
                reason: format!("navigation failed: {err}"),
            };
            return record;
        }

        if guard.title().await.contains("404") {
            record.status = StreamerStatus::NotFound;
            return record;
        }

        let wait = self.browser.selector_timeout();

        // A rendered view counter is the live signal; anything else means the
        // channel is not currently streaming.
        if let Some(viewer_text) = guard.text_of(VIEWER_COUNT_SELECTOR, wait * 2).await {
            // "1,234 watching now" -> leading token is the count.
            let leading = viewer_text.split_whitespace().next().unwrap_or("");
            let viewer_count = parse_viewer_count(leading);

            if let Some(name) = guard.text_of(LIVE_USERNAME_SELECTOR, wait).await {
                record.display_name = name;
            }
            record.avatar_url = guard.attr_of(LIVE_AVATAR_SELECTOR, "src", wait).await;
            let title = guard
                .text_of(LIVE_TITLE_SELECTOR, wait)
                .await
                .unwrap_or_default();

            record.status = StreamerStatus::Live {
                title,
                viewer_count,
                started_at: Utc::now(),
            };
            return record;
        }

        // Offline fallback: the channel home page carries the profile fields
        // and the most recent video's "Streamed ... ago" line.
        let home_url = format!("https://www.youtube.com/channel/{streamer_ref}");
        if let Err(err) = guard.navigate(&home_url, self.browser.navigation_timeout()).await {
            record.status = StreamerStatus::Error {
                reason: format!("navigation failed: {err}"),
            };
            return record;
        }
        if guard.title().await.contains("404") {
            record.status = StreamerStatus::NotFound;
            return record;
        }

        match guard.text_of(HOME_USERNAME_SELECTOR, wait).await {
            Some(name) => record.display_name = name,
            None => record.error_details = Some("profile header missing".to_string()),
        }
        record.avatar_url = guard.attr_of(HOME_AVATAR_SELECTOR, "src", wait).await;

        let last_broadcast_at = guard
            .text_of(HOME_LAST_BROADCAST_SELECTOR, wait)
            .await
            .and_then(|text| {
                // "Streamed 3 days ago" / "3 days ago"
                let trimmed = text.trim_start_matches("Streamed").trim();
                parse_relative_time(trimmed, Utc::now())
            });

        record.status = StreamerStatus::Offline { last_broadcast_at };
        record
    }
}
