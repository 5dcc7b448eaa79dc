//! State shared by every listener of the HTTP interface.

use axum::http::HeaderValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::envelope::ResponsePolicy;
use crate::config::DhiConfig;
use crate::error::{CoreError, Result};
use crate::provider::ServiceRegistry;

/// Shared request-handling state.
pub struct DhiState {
    /// Service routing table.
    pub registry: Arc<ServiceRegistry>,
    /// Response policy.
    pub policy: ResponsePolicy,
    /// `Location` for plain-HTTP redirects, when enabled.
    pub redirect: Option<HeaderValue>,
    /// Bound on buffering a request body.
    pub read_timeout: Option<Duration>,
    /// Bound on executing a request.
    pub write_timeout: Option<Duration>,
    /// Interface start time.
    pub start_time: Instant,
    /// Statistics counters.
    pub stats: Stats,
}

impl DhiState {
    /// Creates the state from configuration.
    pub fn new(config: &DhiConfig, registry: Arc<ServiceRegistry>) -> Result<Self> {
        let redirect = if config.redirect_http {
            let location = HeaderValue::try_from(config.redirect_destination.as_str())
                .map_err(|e| {
                    CoreError::config_with_source("Conf parameter redirect_destination not valid", e)
                })?;
            Some(location)
        } else {
            None
        };

        Ok(Self {
            registry,
            policy: ResponsePolicy::from_config(config)?,
            redirect,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            start_time: Instant::now(),
            stats: Stats::default(),
        })
    }

    /// Returns the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Request counters.
#[derive(Default)]
pub struct Stats {
    /// Total requests received.
    pub requests_total: AtomicU64,
    /// Requests finishing with a 200 outcome.
    pub requests_success: AtomicU64,
    /// Requests finishing with any other outcome.
    pub requests_failed: AtomicU64,
}

impl Stats {
    /// Counts an incoming request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a finished request by its final outcome code.
    pub fn record_outcome(&self, code: i32) {
        if code == 200 {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gets the current statistics as a snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of statistics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total requests received.
    pub requests_total: u64,
    /// Requests finishing with a 200 outcome.
    pub requests_success: u64,
    /// Requests finishing with any other outcome.
    pub requests_failed: u64,
}
