//! Stream-URL resolver
//!
//! Turns `(platform, streamer)` into a media playlist URL the transcoder can
//! read. Fast path: the latest catalog snapshot already carries a playlist
//! URL for the live record. Slow path: drive the shared browser to the watch
//! page, nudge the video element into playing, and intercept the first
//! `.m3u8` response. No retries: the catalog freshens every minute, a failed
//! resolve just fails the job.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use futures::StreamExt;
use tracing::{debug, info};

use crate::browser::BrowserManager;
use crate::catalog::CatalogStore;
use crate::errors::ResolveError;
use crate::models::{channel_url, Platform};

/// JS nudge that forces the player to request the live playlist.
const PLAY_NUDGE: &str = r#"(() => {
    const v = document.querySelector('video');
    if (v) {
        try { v.currentTime = 0; v.muted = true; v.play(); } catch (e) {}
        return true;
    }
    return false;
})()"#;

const VIDEO_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct StreamUrlResolver {
    store: CatalogStore,
    browser: BrowserManager,
}

impl StreamUrlResolver {
    pub fn new(store: CatalogStore, browser: BrowserManager) -> Self {
        Self { store, browser }
    }

    pub async fn resolve(
        &self,
        platform: Platform,
        streamer_ref: &str,
    ) -> Result<String, ResolveError> {
        // Fast path: the poller already saw a playlist URL for this streamer.
        if let Some(record) = self.store.latest().find(platform, streamer_ref) {
            if record.is_live() {
                if let Some(url) = &record.stream_url {
                    debug!(platform = %platform, streamer = streamer_ref, "resolved from catalog");
                    return Ok(url.clone());
                }
            }
        }

        self.probe_watch_page(platform, streamer_ref).await
    }

    /// Load the watch page and capture the first media playlist request the
    /// player makes. The response subscription lives only as long as this
    /// call; the page is closed on every exit path by its guard.
    async fn probe_watch_page(
        &self,
        platform: Platform,
        streamer_ref: &str,
    ) -> Result<String, ResolveError> {
        let nav_err = |reason: String| ResolveError::Navigation {
            platform: platform.to_string(),
            streamer: streamer_ref.to_string(),
            reason,
        };

        let guard = self
            .browser
            .open_page()
            .await
            .map_err(|e| nav_err(e.to_string()))?;

        let mut responses = guard
            .page()
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| nav_err(e.to_string()))?;

        let url = channel_url(platform, streamer_ref);
        guard
            .navigate(&url, self.browser.navigation_timeout())
            .await
            .map_err(|e| nav_err(e.to_string()))?;

        // Wait for the player, then force a playlist request.
        if guard.wait_for_element("video", VIDEO_WAIT).await.is_none() {
            return Err(ResolveError::NoPlaylist {
                platform: platform.to_string(),
                streamer: streamer_ref.to_string(),
            });
        }
        let _ = guard.page().evaluate(PLAY_NUDGE).await;

        let playlist = tokio::time::timeout(self.browser.playlist_wait(), async {
            while let Some(event) = responses.next().await {
                if event.response.url.contains(".m3u8") {
                    return Some(event.response.url.clone());
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        match playlist {
            Some(url) => {
                info!(platform = %platform, streamer = streamer_ref, "playlist intercepted");
                Ok(url)
            }
            None => Err(ResolveError::NoPlaylist {
                platform: platform.to_string(),
                streamer: streamer_ref.to_string(),
            }),
        }
    }
}
