//! daemoncore - In-process daemon supervisor with a panic-isolating HTTP front end
//!
//! This crate runs a set of named long-lived daemons inside one process,
//! supervises them, and tears everything down in reverse order when a
//! signal arrives or any daemon fails.
//!
//! # Overview
//!
//! The main daemon is the Dynamic HTTP Interface (DHI): a pool of HTTP and
//! HTTPS listeners that accept JSON envelopes, route them by service code to
//! a [`provider::ServiceProvider`] and always answer with a well-formed
//! envelope, even when a provider panics.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Configuration file parsing and validation
//! - [`daemon`] - Daemon lifecycle and the supervising manager
//! - [`dhi`] - The HTTP interface daemon
//! - [`provider`] - Service providers and the routing registry
//! - [`cache`] - Weather cache and its janitor daemon
//! - [`error`] - Error types and error handling

pub mod cache;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod dhi;
pub mod error;
pub mod provider;

// Re-exports for convenience
pub use cli::Cli;
pub use config::Config;
pub use daemon::{Daemon, DaemonManager, SupervisorExit};
pub use error::{CoreError, ErrorCode, Result};

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use cache::{CacheJanitor, Persistence, WeatherCache};
use config::ProgramKind;
use daemon::DaemonProgram;
use dhi::Dhi;
use provider::ServiceRegistry;

/// Builds the configured daemons in registration order.
pub fn build_daemons(
    config: &Config,
    cache: &Arc<WeatherCache>,
    registry: &Arc<ServiceRegistry>,
) -> Vec<Daemon> {
    config
        .daemons
        .iter()
        .map(|entry| {
            let program: Option<Arc<dyn DaemonProgram>> = match entry.program {
                Some(ProgramKind::Dhi) => Some(Arc::new(Dhi::new(
                    config.dhi.clone(),
                    Arc::clone(registry),
                ))),
                Some(ProgramKind::CacheJanitor) => Some(Arc::new(CacheJanitor::new(
                    Arc::clone(cache),
                    config.cache.cleanup_interval(),
                ))),
                None => None,
            };

            Daemon::new(entry.name.clone(), program)
                .with_startup_grace(entry.startup_grace())
                .with_shutdown_grace(entry.shutdown_grace())
        })
        .collect()
}

/// Runs the process until an OS shutdown signal or a daemon failure.
pub async fn serve(config: &Config) -> Result<SupervisorExit> {
    serve_until(config, daemon::shutdown_signal()).await
}

/// Runs the process until `shutdown` completes or a daemon fails.
///
/// The cache is restored before any daemon starts and written back after the
/// ordered shutdown. Persistence failures are logged and never fatal.
pub async fn serve_until<F>(config: &Config, shutdown: F) -> Result<SupervisorExit>
where
    F: Future<Output = ()>,
{
    info!("Starting up");

    let cache = Arc::new(WeatherCache::from_config(&config.cache));
    if let Err(e) = cache.load() {
        warn!(error_code = %e.code(), error = %e, "Failed to load cache");
    }

    let registry = Arc::new(provider::build_registry(
        &config.dhi,
        &config.weather,
        Arc::clone(&cache),
    )?);
    let daemons = build_daemons(config, &cache, &registry);
    if daemons.is_empty() {
        warn!("No Daemon(s) to run");
    }

    let mut manager = DaemonManager::new(daemons);
    manager.start_up();
    let exit = manager.supervise(shutdown).await;

    info!(reason = ?exit, "Initiating graceful shutdown");
    let stopped = manager.shut_down().await;

    if let Err(e) = cache.save() {
        error!(error_code = %e.code(), error = %e, "Failed to save cache");
    }

    stopped?;
    info!("Shutdown complete");
    Ok(exit)
}
