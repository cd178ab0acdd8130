use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_clipper::{
    adapters::build_adapters,
    browser::BrowserManager,
    catalog::{CatalogAggregator, CatalogStore},
    config::Config,
    events::EventBus,
    gc::GarbageCollector,
    jobs::JobBroker,
    media::{ClipExtractor, FfmpegRunner},
    resolver::StreamUrlResolver,
    scheduler::PeriodicTrigger,
    upload::Uploader,
    utils::HttpClientFactory,
    web::{AppState, WebServer},
};

/// In-flight jobs get this long to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "stream-clipper")]
#[command(version)]
#[command(about = "Multi-platform live-stream aggregator and clipping service")]
struct Cli {
    /// Platform credentials / roster file
    #[arg(short, long, default_value = "streamers.ini")]
    config: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stream_clipper={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting stream-clipper v{}", env!("CARGO_PKG_VERSION"));

    let ini_path = cli.config.exists().then_some(cli.config.as_path());
    if ini_path.is_none() {
        warn!(path = %cli.config.display(), "config file not found, running on defaults and environment only");
    }
    let mut config = Config::load(ini_path)?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    config
        .storage
        .ensure_layout()
        .context("create storage directories")?;
    info!(data_dir = %config.storage.data_dir.display(), "storage layout ready");

    let active = config.platforms.active();
    if active.is_empty() {
        warn!("no platforms enabled; the catalog will stay empty until a roster is configured");
    } else {
        info!(platforms = ?active, "active platforms");
    }

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    // Shared infrastructure.
    let http = HttpClientFactory::new(config.web.user_agent.clone(), config.http_timeout());
    let browser = BrowserManager::new(config.browser.clone(), config.web.user_agent.clone());
    let bus = EventBus::new();
    let store = CatalogStore::open(config.storage.catalog_path());
    let broker = JobBroker::new(bus.clone());

    // Polling side.
    let adapters = build_adapters(&config, &http, &browser)
        .map_err(|e| anyhow::anyhow!("adapter setup failed: {e}"))?;
    let aggregator = CatalogAggregator::new(&config, adapters, store.clone(), bus.clone());

    // Clipping side.
    let runner = FfmpegRunner::new(config.media.ffmpeg_path.clone());
    let resolver = StreamUrlResolver::new(store.clone(), browser.clone());
    let extractor = ClipExtractor::new(
        broker.clone(),
        runner.clone(),
        config.storage.clone(),
        bus.clone(),
        config.media.max_clip_duration_secs,
    );
    let uploader = Uploader::new(
        broker.clone(),
        http.upload_client().context("build upload client")?,
        config.upload.endpoint.clone(),
    );

    // Background cadences.
    let gc = GarbageCollector::new(broker.clone(), config.storage.clone(), config.gc.clone());
    let trigger = PeriodicTrigger::new(&config, aggregator.clone(), gc, shutdown.clone())?;
    let trigger_task = tokio::spawn(trigger.run());

    let state = AppState {
        config: config.clone(),
        store,
        aggregator,
        broker: broker.clone(),
        bus,
        resolver,
        runner,
        extractor,
        uploader,
    };
    let server = WebServer::new(state)?;

    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move { server.serve(server_shutdown).await });

    wait_for_signal().await;
    info!("shutdown signal received");

    // Stop accepting work, cancel in-flight jobs, close shared resources.
    broker.begin_shutdown();
    shutdown.cancel();
    browser.shutdown().await;

    let drain = async {
        if let Err(err) = trigger_task.await {
            error!(%err, "periodic trigger task panicked");
        }
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%err, "web server error"),
            Err(err) => error!(%err, "web server task panicked"),
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(grace = ?SHUTDOWN_GRACE, "grace period elapsed, forcing exit");
    }

    info!("stream-clipper stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
