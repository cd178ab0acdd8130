//! Periodic trigger
//!
//! Single event loop owning every fixed cadence in the system: the catalog
//! refresh interval, the five-minute stall sweep, the six-hour disk-pressure
//! sweep, and the daily sweep at local midnight. One immediate refresh runs
//! at startup before the first tick. Overlap protection lives in the
//! aggregator itself (overlapping refreshes are dropped, not queued).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::catalog::CatalogAggregator;
use crate::config::Config;
use crate::gc::GarbageCollector;

pub struct PeriodicTrigger {
    aggregator: CatalogAggregator,
    gc: GarbageCollector,
    refresh_interval: Duration,
    stall_interval: Duration,
    disk_interval: Duration,
    daily_schedule: Schedule,
    shutdown: CancellationToken,
}

impl PeriodicTrigger {
    pub fn new(
        config: &Config,
        aggregator: CatalogAggregator,
        gc: GarbageCollector,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let daily_schedule = Schedule::from_str(&config.gc.daily_sweep_cron)
            .with_context(|| format!("invalid cron expression {:?}", config.gc.daily_sweep_cron))?;
        Ok(Self {
            aggregator,
            gc,
            refresh_interval: config.refresh_interval(),
            stall_interval: Duration::from_secs(config.gc.stall_sweep_interval_secs),
            disk_interval: Duration::from_secs(config.gc.disk_sweep_interval_secs),
            daily_schedule,
            shutdown,
        })
    }

    pub async fn run(self) {
        info!(
            refresh = ?self.refresh_interval,
            stall = ?self.stall_interval,
            disk = ?self.disk_interval,
            "periodic trigger started"
        );

        // Startup refresh before the first scheduled tick.
        if let Err(err) = self.aggregator.refresh().await {
            error!(%err, "startup refresh failed");
        }

        let mut refresh_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stall_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.stall_interval,
            self.stall_interval,
        );
        let mut disk_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.disk_interval,
            self.disk_interval,
        );

        loop {
            let daily_sleep = tokio::time::sleep(self.until_next_daily());

            tokio::select! {
                _ = refresh_tick.tick() => {
                    // Run detached so a slow scrape cycle never delays the
                    // other cadences; the aggregator drops overlapping runs.
                    let aggregator = self.aggregator.clone();
                    tokio::spawn(async move {
                        if let Err(err) = aggregator.refresh().await {
                            error!(%err, "scheduled refresh failed");
                        }
                    });
                }
                _ = stall_tick.tick() => {
                    self.gc.stall_sweep();
                }
                _ = disk_tick.tick() => {
                    let gc = self.gc.clone();
                    tokio::task::spawn_blocking(move || gc.disk_pressure_sweep());
                }
                _ = daily_sleep => {
                    debug!("daily sweep fired");
                    let gc = self.gc.clone();
                    tokio::task::spawn_blocking(move || gc.daily());
                }
                _ = self.shutdown.cancelled() => {
                    info!("periodic trigger stopping");
                    return;
                }
            }
        }
    }

    fn until_next_daily(&self) -> Duration {
        let next = self
            .daily_schedule
            .upcoming(chrono::Local)
            .next()
            .map(|at| (at - chrono::Local::now()).to_std().unwrap_or_default())
            // A cron expression with no future firings should not happen with
            // the defaults; fall back to 24 h.
            .unwrap_or_else(|| Duration::from_secs(86_400));
        next.max(Duration::from_secs(1))
    }
}
