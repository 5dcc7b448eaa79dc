//! Listener pool: validated construction, listener tasks and the shared
//! completion state they report into.

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::DhiConfig;
use crate::error::{describe_panic, install_panic_hook, CoreError, Result};

/// Smallest read buffer the HTTP/1 connection accepts.
pub const MIN_HEADER_SIZE: usize = 8192;

const REDIRECT_PATTERN: &str = r"^https://.+$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transport {
    Plain,
    Tls { cert: PathBuf, key: PathBuf },
}

/// One configured listener.
#[derive(Debug, Clone)]
pub(crate) struct ListenerSpec {
    pub label: &'static str,
    pub addr: SocketAddr,
    pub transport: Transport,
}

impl ListenerSpec {
    pub fn encrypted(&self) -> bool {
        matches!(self.transport, Transport::Tls { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Tuning {
    max_header_size: usize,
    header_read_timeout: Option<Duration>,
}

/// Shutdown flag, completion counter and first error. Always accessed as one unit.
#[derive(Debug, Default)]
struct PoolStatus {
    shutdown: bool,
    completed: usize,
    first_error: Option<CoreError>,
}

/// The set of listeners owned by one HTTP interface.
pub(crate) struct ListenerPool {
    listeners: Vec<ListenerSpec>,
    handles: Vec<Handle>,
    tuning: Tuning,
    status: Arc<Mutex<PoolStatus>>,
    changed: Arc<Notify>,
}

impl ListenerPool {
    /// Validates configuration and builds one listener per configured address.
    pub fn build(config: &DhiConfig) -> Result<Self> {
        let mut listeners = Vec::with_capacity(2);

        if let Some(addr) = configured(&config.addr1) {
            listeners.push(ListenerSpec {
                label: "HTTP",
                addr: parse_addr(addr)?,
                transport: Transport::Plain,
            });
        }

        if let Some(addr) = configured(&config.addr2) {
            let cert = configured(&config.tls.cert_path).ok_or_else(|| {
                CoreError::config("dhi.tls.cert_path is required when addr2 is set")
            })?;
            let key = configured(&config.tls.key_path).ok_or_else(|| {
                CoreError::config("dhi.tls.key_path is required when addr2 is set")
            })?;
            listeners.push(ListenerSpec {
                label: "HTTPS",
                addr: parse_addr(addr)?,
                transport: Transport::Tls {
                    cert: PathBuf::from(cert),
                    key: PathBuf::from(key),
                },
            });
        }

        if listeners.is_empty() {
            return Err(CoreError::config("HTTP and HTTPS addresses not configured"));
        }

        if config.redirect_http {
            let pattern = Regex::new(REDIRECT_PATTERN)
                .map_err(|e| CoreError::config_with_source("Invalid redirect pattern", e))?;
            if !pattern.is_match(&config.redirect_destination) {
                return Err(CoreError::config(
                    "Conf parameter redirect_destination not valid",
                ));
            }
        }

        if config.max_header_size < MIN_HEADER_SIZE {
            return Err(CoreError::config(format!(
                "dhi.max_header_size must be at least {}",
                MIN_HEADER_SIZE
            )));
        }

        let header_read_timeout = match (config.read_timeout(), config.idle_timeout()) {
            (Some(read), Some(idle)) => Some(read.min(idle)),
            (read, idle) => read.or(idle),
        };

        Ok(Self {
            handles: listeners.iter().map(|_| Handle::new()).collect(),
            listeners,
            tuning: Tuning {
                max_header_size: config.max_header_size,
                header_read_timeout,
            },
            status: Arc::new(Mutex::new(PoolStatus::default())),
            changed: Arc::new(Notify::new()),
        })
    }

    /// Configured listeners.
    pub fn listeners(&self) -> &[ListenerSpec] {
        &self.listeners
    }

    /// Spawns one task per listener. `router` builds the per-listener router.
    pub fn launch<F>(&self, router: F)
    where
        F: Fn(&ListenerSpec) -> Router,
    {
        install_panic_hook();
        for (spec, handle) in self.listeners.iter().zip(&self.handles) {
            let app = router(spec);
            let spec = spec.clone();
            let handle = handle.clone();
            let tuning = self.tuning;
            let status = Arc::clone(&self.status);
            let changed = Arc::clone(&self.changed);

            tokio::spawn(async move {
                let label = spec.label;
                let served = tokio::spawn(serve_listener(spec, app, handle, tuning)).await;
                let result = match served {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) if e.is_panic() => Err(format!("Panicked [{}]", describe_panic(e))),
                    Err(e) => Err(e.to_string()),
                };

                let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
                guard.completed += 1;
                match result {
                    Err(message) if !guard.shutdown && guard.first_error.is_none() => {
                        guard.first_error = Some(CoreError::listener_fault(label, message));
                    }
                    Err(message) => {
                        debug!(listener = %label, error = %message, "Listener error ignored")
                    }
                    Ok(()) => {}
                }
                drop(guard);

                info!(listener = %label, "{} interface listener stopped", label);
                changed.notify_one();
            });
        }
    }

    /// Sets the shutdown flag and closes every listener.
    pub fn request_shutdown(&self) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown = true;

        for handle in &self.handles {
            handle.shutdown();
        }
    }

    /// `Some` once the pool is finished: the first listener error, or `Ok`
    /// when every listener has returned.
    pub fn verdict(&self) -> Option<Result<()>> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = status.first_error.take() {
            return Some(Err(err));
        }
        (status.completed == self.listeners.len()).then_some(Ok(()))
    }

    /// Waits until a listener task reports completion.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

fn configured(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parses `host:port`, accepting `:port` as all interfaces.
fn parse_addr(addr: &str) -> Result<SocketAddr> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|e| {
            CoreError::config_with_source(format!("Invalid listen address '{}'", addr), e)
        })?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    addr.parse().map_err(|e| {
        CoreError::config_with_source(format!("Invalid listen address '{}'", addr), e)
    })
}

async fn serve_listener(
    spec: ListenerSpec,
    app: Router,
    handle: Handle,
    tuning: Tuning,
) -> std::io::Result<()> {
    info!(
        listener = %spec.label,
        addr = %spec.addr,
        "{} interface listener started on {}",
        spec.label,
        spec.addr
    );

    match spec.transport {
        Transport::Plain => {
            let mut server = axum_server::bind(spec.addr).handle(handle);
            tune(server.http_builder(), tuning);
            server.serve(app.into_make_service()).await
        }
        Transport::Tls { cert, key } => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            let mut server = axum_server::bind_rustls(spec.addr, tls).handle(handle);
            tune(server.http_builder(), tuning);
            server.serve(app.into_make_service()).await
        }
    }
}

fn tune(
    builder: &mut hyper_util::server::conn::auto::Builder<hyper_util::rt::TokioExecutor>,
    tuning: Tuning,
) {
    let mut http1 = builder.http1();
    http1.timer(TokioTimer::new()).max_buf_size(tuning.max_header_size);
    if let Some(limit) = tuning.header_read_timeout {
        http1.header_read_timeout(limit);
    }
}
