//! HTTP client factory
//!
//! All adapter traffic goes through clients built here so the configured
//! User-Agent and per-request timeout apply uniformly.

use std::time::Duration;

use reqwest::Client;

/// Builds `reqwest` clients with the application's User-Agent and timeouts.
#[derive(Clone)]
pub struct HttpClientFactory {
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(user_agent: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            request_timeout,
        }
    }

    /// Client for platform API calls: short per-request timeout.
    pub fn api_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.request_timeout)
            .connect_timeout(self.request_timeout)
            .build()
    }

    /// Client for clip uploads: no overall timeout, uploads are bounded by
    /// shutdown cancellation instead.
    pub fn upload_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.request_timeout)
            .build()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            Duration::from_secs(10),
        )
    }
}
