//! Dynamic HTTP Interface.
//!
//! Serves JSON envelopes on one plain and one TLS listener. Every request is
//! routed by its `SrID` to a registered [`ServiceProvider`] and runs in its
//! own task, so a provider panic costs one 500 response and nothing else.
//!
//! [`ServiceProvider`]: crate::provider::ServiceProvider

pub mod envelope;
pub mod handler;
pub mod pool;
pub mod state;


use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::DhiConfig;
use crate::daemon::{DaemonCommand, DaemonContext, DaemonProgram, DaemonReport};
use crate::error::{install_panic_hook, Result};
use crate::provider::ServiceRegistry;
use handler::{handle_request, ListenerState};
use pool::ListenerPool;
use state::DhiState;

/// Creates the router for one listener. Every method and path lands on the
/// envelope handler.
pub fn create_router(shared: Arc<DhiState>, encrypted: bool) -> Router {
    install_panic_hook();
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(ListenerState { shared, encrypted })
}

/// The HTTP interface as a supervised daemon program.
pub struct Dhi {
    config: DhiConfig,
    registry: Arc<ServiceRegistry>,
}

impl Dhi {
    pub fn new(config: DhiConfig, registry: Arc<ServiceRegistry>) -> Self {
        Self { config, registry }
    }
}

#[async_trait]
impl DaemonProgram for Dhi {
    async fn run(&self, mut ctx: DaemonContext) -> Result<()> {
        let prepared = ListenerPool::build(&self.config).and_then(|pool| {
            let shared = DhiState::new(&self.config, Arc::clone(&self.registry))?;
            Ok((pool, Arc::new(shared)))
        });

        let (pool, shared) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(daemon = %ctx.name(), error = %e, "Interface startup failed");
                ctx.report(DaemonReport::startup_failed(e.to_string())).await;
                return Err(e);
            }
        };

        pool.launch(|spec| create_router(Arc::clone(&shared), spec.encrypted()));
        info!(
            daemon = %ctx.name(),
            listeners = pool.listeners().len(),
            services = self.registry.len(),
            "Interface started"
        );
        ctx.report(DaemonReport::started("OK")).await;

        let mut commands_open = true;
        let mut fault = None;
        let outcome = loop {
            match pool.verdict() {
                Some(Err(e)) => {
                    error!(daemon = %ctx.name(), error = %e, "Listener failed, closing the remaining listeners");
                    pool.request_shutdown();
                    fault = Some(e);
                    continue;
                }
                Some(Ok(())) => break fault.map_or(Ok(()), Err),
                None => {}
            }

            tokio::select! {
                command = ctx.next_command(), if commands_open => match command {
                    Some(DaemonCommand::Shutdown) => {
                        info!(daemon = %ctx.name(), "Shutdown requested");
                        pool.request_shutdown();
                    }
                    None => {
                        commands_open = false;
                        pool.request_shutdown();
                    }
                },
                _ = pool.changed() => {}
            }
        };

        let stats = shared.stats.snapshot();
        info!(
            daemon = %ctx.name(),
            uptime_seconds = shared.uptime_seconds(),
            requests_total = stats.requests_total,
            requests_success = stats.requests_success,
            requests_failed = stats.requests_failed,
            "Interface stopped"
        );
        outcome
    }
}
