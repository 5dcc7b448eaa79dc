//! Periodic cache eviction daemon.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use super::WeatherCache;
use crate::daemon::{DaemonCommand, DaemonContext, DaemonProgram, DaemonReport};
use crate::error::Result;

/// Evicts entries past the stale horizon on a fixed interval.
pub struct CacheJanitor {
    cache: Arc<WeatherCache>,
    interval: Duration,
}

impl CacheJanitor {
    /// Creates a janitor sweeping `cache` every `interval`.
    pub fn new(cache: Arc<WeatherCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }
}

#[async_trait]
impl DaemonProgram for CacheJanitor {
    async fn run(&self, mut ctx: DaemonContext) -> Result<()> {
        ctx.report(DaemonReport::started("OK")).await;

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = ctx.next_command() => match command {
                    Some(DaemonCommand::Shutdown) | None => return Ok(()),
                },
                _ = ticker.tick() => {
                    let remaining = self.cache.clean_expired();
                    info!(
                        daemon = %ctx.name(),
                        size = remaining,
                        "Cleaned expired entries. Current size: {}",
                        remaining
                    );
                }
            }
        }
    }
}
