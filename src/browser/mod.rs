//! Shared headless browser
//!
//! One Chromium process serves every scrape adapter and the stream-URL
//! resolver. The browser is launched lazily on first use; each operation gets
//! its own page through a [`PageGuard`] that closes the page on every exit
//! path, including cancellation. Scrape adapters run sequentially within a
//! platform, so page pressure stays low.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, Headers, ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::errors::BrowserError;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct LaunchedBrowser {
    browser: Browser,
    event_loop: JoinHandle<()>,
}

/// Process-wide browser owner. Cheap to clone; all clones share the single
/// Chromium instance.
#[derive(Clone)]
pub struct BrowserManager {
    settings: Arc<BrowserSettings>,
    user_agent: String,
    inner: Arc<tokio::sync::Mutex<Option<LaunchedBrowser>>>,
    open_pages: Arc<AtomicUsize>,
}

impl BrowserManager {
    pub fn new(settings: BrowserSettings, user_agent: String) -> Self {
        Self {
            settings: Arc::new(settings),
            user_agent,
            inner: Arc::new(tokio::sync::Mutex::new(None)),
            open_pages: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.navigation_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.selector_timeout_secs)
    }

    pub fn playlist_wait(&self) -> Duration {
        Duration::from_secs(self.settings.playlist_wait_secs)
    }

    /// Open a fresh page, launching the browser if this is the first use.
    pub async fn open_page(&self) -> Result<PageGuard, BrowserError> {
        let mut inner = self.inner.lock().await;
        if inner.is_none() {
            *inner = Some(self.launch().await?);
        }

        let launched = inner.as_ref().expect("just launched");
        let page = launched
            .browser
            .new_page("about:blank")
            .await
            .map_err(BrowserError::from)?;
        drop(inner);

        self.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(PageGuard {
            page,
            intercept_task: None,
            open_pages: self.open_pages.clone(),
        })
    }

    async fn launch(&self) -> Result<LaunchedBrowser, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled");
        if let Some(executable) = &self.settings.executable {
            builder = builder.chrome_executable(executable.clone());
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler stream must be polled for the browser to make progress.
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            debug!("browser event loop ended");
        });

        info!("headless browser launched");
        Ok(LaunchedBrowser {
            browser,
            event_loop,
        })
    }

    /// Close the browser if it was ever launched. Called once at shutdown.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut launched) = inner.take() {
            let open = self.open_pages.load(Ordering::SeqCst);
            if open > 0 {
                debug!(open_pages = open, "closing browser with pages still open");
            }
            if let Err(err) = launched.browser.close().await {
                warn!(%err, "browser close failed");
            }
            let _ = launched.browser.wait().await;
            launched.event_loop.abort();
            info!("headless browser closed");
        }
    }
}

/// A page scoped to one operation. Dropping the guard closes the page and
/// tears down any request interception, on success, error and cancellation
/// paths alike.
pub struct PageGuard {
    page: Page,
    intercept_task: Option<JoinHandle<()>>,
    open_pages: Arc<AtomicUsize>,
}

impl PageGuard {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate and wait for the load to settle, bounded by `timeout`.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| BrowserError::Timeout(timeout, format!("navigation to {url}")))?
            .map_err(BrowserError::from)
    }

    /// Apply extra HTTP headers to every request this page makes.
    pub async fn set_extra_headers(&self, headers: serde_json::Value) -> Result<(), BrowserError> {
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await
            .map_err(BrowserError::from)?;
        Ok(())
    }

    /// Block image/stylesheet/font requests unless their URL matches one of
    /// `allowed_hosts`. Cuts page weight on scrape targets without starving
    /// the media CDNs whose assets the adapters read.
    pub async fn block_static_assets(
        &mut self,
        allowed_hosts: &[&'static str],
    ) -> Result<(), BrowserError> {
        let patterns = [
            ResourceType::Image,
            ResourceType::Stylesheet,
            ResourceType::Font,
        ]
        .into_iter()
        .map(|resource_type| RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(resource_type),
            request_stage: Some(RequestStage::Request),
        })
        .collect::<Vec<_>>();

        self.page
            .execute(FetchEnableParams {
                patterns: Some(patterns),
                handle_auth_requests: None,
            })
            .await
            .map_err(BrowserError::from)?;

        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(BrowserError::from)?;
        let page = self.page.clone();
        let allowed: Vec<&'static str> = allowed_hosts.to_vec();

        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let url = event.request.url.as_str();
                let allow = allowed.iter().any(|host| url.contains(host));
                let result = if allow {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                } else {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                };
                if result.is_err() {
                    // Page is gone; interception dies with it.
                    break;
                }
            }
        });
        self.intercept_task = Some(task);
        Ok(())
    }

    /// Poll for a selector until it appears or `timeout` elapses. Missing
    /// elements are expected on scrape targets and reported as `None`.
    pub async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Option<Element> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Some(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    /// Inner text of the first element matching `selector`, if any appears
    /// within `timeout`.
    pub async fn text_of(&self, selector: &str, timeout: Duration) -> Option<String> {
        let element = self.wait_for_element(selector, timeout).await?;
        element
            .inner_text()
            .await
            .ok()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Attribute value of the first element matching `selector`.
    pub async fn attr_of(&self, selector: &str, attr: &str, timeout: Duration) -> Option<String> {
        let element = self.wait_for_element(selector, timeout).await?;
        element.attribute(attr).await.ok().flatten()
    }

    /// Page title, empty when unavailable.
    pub async fn title(&self) -> String {
        self.page
            .get_title()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Current URL after any redirects.
    pub async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(task) = self.intercept_task.take() {
            task.abort();
        }
        self.open_pages.fetch_sub(1, Ordering::SeqCst);
        let page = self.page.clone();
        tokio::spawn(async move {
            if let Err(err) = page.close().await {
                debug!(%err, "page close failed");
            }
        });
    }
}
