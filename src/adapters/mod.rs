//! Platform adapters
//!
//! One adapter per platform, all behind [`PlatformAdapter`]. An adapter turns
//! a roster entry into a normalized [`StreamerRecord`] and never lets a
//! network or scrape failure escape: errors collapse into the record's
//! `Error` variant or its `error_details` annotation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::BrowserManager;
use crate::config::Config;
use crate::errors::AppResult;
use crate::models::{Platform, StreamerRecord};
use crate::utils::HttpClientFactory;

pub mod dlive;
pub mod kick;
pub mod parti;
pub mod trovo;
pub mod twitch;
pub mod youtube;

pub use dlive::DLiveAdapter;
pub use kick::KickAdapter;
pub use parti::PartiAdapter;
pub use trovo::TrovoAdapter;
pub use twitch::TwitchAdapter;
pub use youtube::YouTubeAdapter;

/// Uniform fetch capability over all platforms.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch one streamer's state. Infallible by contract: failures become
    /// `Error` records.
    async fn fetch(&self, streamer_ref: &str) -> StreamerRecord;

    /// Fetch the whole roster in one pass when the platform API supports
    /// multi-identity queries. `None` means the aggregator should fan out
    /// per-streamer [`fetch`](PlatformAdapter::fetch) calls instead.
    async fn fetch_batch(&self, refs: &[String]) -> Option<Vec<StreamerRecord>> {
        let _ = refs;
        None
    }
}

/// Build adapters for every active platform in the configuration.
pub fn build_adapters(
    config: &Config,
    http: &HttpClientFactory,
    browser: &BrowserManager,
) -> AppResult<HashMap<Platform, Arc<dyn PlatformAdapter>>> {
    let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();

    for platform in config.platforms.active() {
        let adapter: Arc<dyn PlatformAdapter> = match platform {
            Platform::Parti => Arc::new(PartiAdapter::new(http)?),
            Platform::DLive => Arc::new(DLiveAdapter::new(http)?),
            Platform::Trovo => Arc::new(TrovoAdapter::new(
                http,
                config.credentials.trovo_client_id.clone(),
            )?),
            Platform::Twitch => Arc::new(TwitchAdapter::new(
                http,
                config.credentials.twitch_client_id.clone().unwrap_or_default(),
                config.credentials.twitch_client_secret.clone().unwrap_or_default(),
            )?),
            Platform::Kick => Arc::new(KickAdapter::new(
                browser.clone(),
                config.credentials.kick_client_token.clone(),
            )),
            Platform::YouTube => Arc::new(YouTubeAdapter::new(browser.clone())),
        };
        adapters.insert(platform, adapter);
    }

    Ok(adapters)
}
