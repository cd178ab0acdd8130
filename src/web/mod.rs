//! Web layer
//!
//! HTTP interface plus the WebSocket push channel. Handlers are thin: they
//! parse and validate, then delegate to the shared [`AppState`] operations
//! that the WebSocket command loop reuses, so both surfaces stay
//! semantically identical.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::catalog::{CatalogAggregator, CatalogStore};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::events::EventBus;
use crate::jobs::{Job, JobBroker};
use crate::media::{run_capture_job, ClipExtractor, FfmpegRunner};
use crate::models::Platform;
use crate::resolver::StreamUrlResolver;
use crate::upload::Uploader;

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod websocket;

pub use responses::ApiResponse;

/// Shared service dependencies for handlers and the WebSocket loop.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CatalogStore,
    pub aggregator: CatalogAggregator,
    pub broker: JobBroker,
    pub bus: EventBus,
    pub resolver: StreamUrlResolver,
    pub runner: FfmpegRunner,
    pub extractor: ClipExtractor,
    pub uploader: Uploader,
}

impl AppState {
    /// Create a capture job and spawn its pipeline task.
    pub fn start_capture(
        &self,
        platform: Platform,
        streamer_id: &str,
        max_duration: Option<u64>,
    ) -> AppResult<Job> {
        if !self.config.platforms.roster(platform).enabled {
            return Err(AppError::configuration(format!(
                "platform {platform} is not enabled"
            )));
        }
        let cap = self.config.media.max_clip_duration_secs;
        let duration = max_duration.unwrap_or(cap).min(cap).max(1);

        let job = self.broker.create(platform, streamer_id)?;
        tokio::spawn(run_capture_job(
            self.broker.clone(),
            self.resolver.clone(),
            self.runner.clone(),
            self.config.storage.temp_dir(),
            job.id,
            duration,
        ));
        Ok(job)
    }

    /// Kick off a catalog refresh in the background; overlapping triggers
    /// are dropped by the aggregator.
    pub fn trigger_refresh(&self, platform: Option<Platform>) {
        let aggregator = self.aggregator.clone();
        tokio::spawn(async move {
            let result = match platform {
                Some(platform) => aggregator.refresh_platform(platform).await,
                None => aggregator.refresh().await,
            };
            if let Err(err) = result {
                tracing::error!(%err, "manual refresh failed");
            }
        });
    }
}

/// Web server bound to the configured address.
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", state.config.web.host, state.config.web.port)
            .parse()
            .context("invalid listen address")?;

        let api = Router::new()
            .route("/streamers", get(handlers::streamers::list_streamers))
            .route("/streamers/live", get(handlers::streamers::live_streamers))
            .route(
                "/streamers/{platform}",
                get(handlers::streamers::platform_streamers),
            )
            .route("/refresh", post(handlers::streamers::refresh_all))
            .route(
                "/refresh/{platform}",
                post(handlers::streamers::refresh_platform),
            )
            .route("/capture", post(handlers::jobs::create_capture))
            .route("/jobs", get(handlers::jobs::list_jobs))
            .route("/jobs/{id}", get(handlers::jobs::get_job))
            .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
            .route("/clip", post(handlers::jobs::create_clip))
            .route("/preview", post(handlers::jobs::generate_preview))
            .route("/upload", post(handlers::jobs::upload_clip))
            .route("/clips", get(handlers::clips::list_clips))
            .route("/clips/{id}", delete(handlers::clips::delete_clip))
            .layer(from_fn_with_state(state.clone(), middleware::api_key_auth));

        let app = Router::new()
            .route("/health", get(handlers::health))
            .route("/ws", get(websocket::ws_handler))
            .nest("/api", api)
            .layer(from_fn(middleware::request_logging))
            .layer(CorsLayer::permissive())
            .with_state(state);

        Ok(Self { app, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the shutdown token fires, then drain gracefully.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("bind {}", self.addr))?;
        info!(addr = %self.addr, "web server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("web server failed")?;
        Ok(())
    }
}
