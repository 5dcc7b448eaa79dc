//! Error types and error handling for daemoncore.
//!
//! This module defines the error taxonomy shared by the daemon manager, the
//! HTTP interface and the collaborators, along with stable error codes used
//! as structured log fields and CLI exit codes.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::sync::{Mutex, MutexGuard, Once, OnceLock, PoisonError};
use thiserror::Error;
use tokio::task::{self, JoinError};

/// Error codes used in structured logs.
/// Each error has a unique code for identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// E001: Configuration is invalid
    #[serde(rename = "E001")]
    ConfigInvalid,

    /// E002: A listener stopped while no shutdown was requested
    #[serde(rename = "E002")]
    ListenerFault,

    /// E003: A daemon failed its startup handshake
    #[serde(rename = "E003")]
    StartupFailed,

    /// E004: A daemon program ended with an error
    #[serde(rename = "E004")]
    DaemonFailed,

    /// E005: Ordered shutdown was aborted
    #[serde(rename = "E005")]
    ShutdownAborted,

    /// E006: An upstream service call failed
    #[serde(rename = "E006")]
    UpstreamError,

    /// E007: Cache persistence failed
    #[serde(rename = "E007")]
    CacheError,
}

impl ErrorCode {
    /// Returns the error code as a string (e.g., "E001").
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "E001",
            ErrorCode::ListenerFault => "E002",
            ErrorCode::StartupFailed => "E003",
            ErrorCode::DaemonFailed => "E004",
            ErrorCode::ShutdownAborted => "E005",
            ErrorCode::UpstreamError => "E006",
            ErrorCode::CacheError => "E007",
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "Configuration is invalid",
            ErrorCode::ListenerFault => "Listener stopped unexpectedly",
            ErrorCode::StartupFailed => "Daemon startup failed",
            ErrorCode::DaemonFailed => "Daemon failed",
            ErrorCode::ShutdownAborted => "Shutdown sequence aborted",
            ErrorCode::UpstreamError => "Upstream service call failed",
            ErrorCode::CacheError => "Cache persistence failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CLI exit codes.
pub mod exit_code {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// General error
    pub const GENERAL_ERROR: i32 = 1;
    /// Configuration error
    pub const CONFIG_ERROR: i32 = 2;
    /// A daemon failed or shutdown was aborted
    pub const DAEMON_ERROR: i32 = 3;
    /// Command line argument error
    pub const CLI_ERROR: i32 = 64;
}

/// The main error type for daemoncore.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration is invalid or cannot be loaded.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A listener's accept loop ended while shutdown was not requested.
    #[error("{listener} interface listener unexpectedly shutdown [{message}]")]
    ListenerFault { listener: String, message: String },

    /// A daemon reported a failed startup.
    #[error("Daemon {daemon}: Startup failed [{note}]")]
    StartupFailed { daemon: String, note: String },

    /// A daemon program ended with an error or panicked.
    #[error("Daemon {daemon}: Encountered error [{note}]")]
    DaemonFailed { daemon: String, note: String },

    /// A daemon acknowledged shutdown with an error; remaining daemons were not signalled.
    #[error("Shutdown aborted at daemon {daemon} [{note}]")]
    ShutdownAborted { daemon: String, note: String },

    /// An upstream HTTP call failed.
    #[error("Upstream error: {message}")]
    Upstream {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache persistence failed.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Config { .. } => ErrorCode::ConfigInvalid,
            CoreError::ListenerFault { .. } => ErrorCode::ListenerFault,
            CoreError::StartupFailed { .. } => ErrorCode::StartupFailed,
            CoreError::DaemonFailed { .. } => ErrorCode::DaemonFailed,
            CoreError::ShutdownAborted { .. } => ErrorCode::ShutdownAborted,
            CoreError::Upstream { .. } => ErrorCode::UpstreamError,
            CoreError::Cache { .. } => ErrorCode::CacheError,
            CoreError::Io(_) => ErrorCode::CacheError,
            CoreError::Yaml(_) => ErrorCode::ConfigInvalid,
            CoreError::Json(_) => ErrorCode::CacheError,
        }
    }

    /// Returns the CLI exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Config { .. } | CoreError::Yaml(_) => exit_code::CONFIG_ERROR,
            CoreError::ListenerFault { .. }
            | CoreError::StartupFailed { .. }
            | CoreError::DaemonFailed { .. }
            | CoreError::ShutdownAborted { .. } => exit_code::DAEMON_ERROR,
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Creates a configuration error with a message.
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error with a message and source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a listener fault.
    pub fn listener_fault(listener: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ListenerFault {
            listener: listener.into(),
            message: message.into(),
        }
    }

    /// Creates an upstream error with a message.
    pub fn upstream(message: impl Into<String>) -> Self {
        CoreError::Upstream {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an upstream error with a message and source.
    pub fn upstream_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::Upstream {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a cache error with a message and source.
    pub fn cache_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Panic backtraces captured inside tokio tasks, keyed by task id.
static PANIC_TRACES: OnceLock<Mutex<HashMap<task::Id, String>>> = OnceLock::new();
static PANIC_HOOK: Once = Once::new();
const PANIC_TRACE_CAPACITY: usize = 64;

fn panic_traces() -> MutexGuard<'static, HashMap<task::Id, String>> {
    PANIC_TRACES
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Installs a panic hook that records the backtrace of a panicking tokio
/// task at the panic site. The previous hook still runs afterwards.
///
/// Idempotent. [`describe_panic`] picks the recorded backtrace up when the
/// task's [`JoinError`] is recovered.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(id) = task::try_id() {
                let trace = Backtrace::force_capture().to_string();
                let mut traces = panic_traces();
                if traces.len() >= PANIC_TRACE_CAPACITY {
                    if let Some(evicted) = traces.keys().next().copied() {
                        traces.remove(&evicted);
                    }
                }
                traces.insert(id, trace);
            }
            previous(info);
        }));
    });
}

/// Renders a panicked task's message together with its backtrace.
///
/// The backtrace comes from the panic site when [`install_panic_hook`] was
/// active. Otherwise it is captured here and labelled as the recovery site.
pub(crate) fn describe_panic(err: JoinError) -> String {
    let trace = panic_traces().remove(&err.id());
    let message = match err.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(e) => return e.to_string(),
    };

    match trace {
        Some(trace) => format!("{} : {}", message, trace),
        None => format!(
            "{} : backtrace of recovery site: {}",
            message,
            Backtrace::force_capture()
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result type alias for daemoncore operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ConfigInvalid.as_str(), "E001");
        assert_eq!(ErrorCode::ListenerFault.as_str(), "E002");
        assert_eq!(ErrorCode::StartupFailed.as_str(), "E003");
        assert_eq!(ErrorCode::DaemonFailed.as_str(), "E004");
        assert_eq!(ErrorCode::ShutdownAborted.as_str(), "E005");
        assert_eq!(ErrorCode::UpstreamError.as_str(), "E006");
        assert_eq!(ErrorCode::CacheError.as_str(), "E007");
    }

    #[test]
    fn test_core_error_code() {
        let err = CoreError::config("no listener");
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);

        let err = CoreError::listener_fault("HTTP", "address in use");
        assert_eq!(err.code(), ErrorCode::ListenerFault);

        let err = CoreError::DaemonFailed {
            daemon: "DHI0".to_string(),
            note: "boom".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::DaemonFailed);
    }

    #[test]
    fn test_core_error_exit_code() {
        let err = CoreError::config("invalid yaml");
        assert_eq!(err.exit_code(), exit_code::CONFIG_ERROR);

        let err = CoreError::ShutdownAborted {
            daemon: "DHI0".to_string(),
            note: "stuck".to_string(),
        };
        assert_eq!(err.exit_code(), exit_code::DAEMON_ERROR);

        let err = CoreError::upstream("geocoding down");
        assert_eq!(err.exit_code(), exit_code::GENERAL_ERROR);
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::listener_fault("HTTPS", "bind failed");
        assert_eq!(
            format!("{}", err),
            "HTTPS interface listener unexpectedly shutdown [bind failed]"
        );

        let err = CoreError::StartupFailed {
            daemon: "DHI0".to_string(),
            note: "Startup grace period expired".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Daemon DHI0: Startup failed [Startup grace period expired]"
        );
    }

    #[inline(never)]
    fn explode_in_worker() {
        let lanes: Vec<u8> = Vec::new();
        std::hint::black_box(lanes[3]);
    }

    #[tokio::test]
    async fn test_describe_panic_keeps_panic_site_backtrace() {
        install_panic_hook();

        let err = tokio::spawn(async { explode_in_worker() }).await.unwrap_err();
        let note = describe_panic(err);

        assert!(note.contains("index out of bounds"));
        assert!(note.contains("explode_in_worker"));
        assert!(!note.contains("recovery site"));
    }

    #[tokio::test]
    async fn test_describe_panic_payloads() {
        let err = tokio::spawn(async { std::panic::panic_any("static message"); })
            .await
            .unwrap_err();
        assert!(describe_panic(err).starts_with("static message : "));

        let err = tokio::spawn(async { std::panic::panic_any(String::from("owned message")); })
            .await
            .unwrap_err();
        assert!(describe_panic(err).starts_with("owned message : "));

        let err = tokio::spawn(async { std::panic::panic_any(42_u32); })
            .await
            .unwrap_err();
        assert!(describe_panic(err).starts_with("non-string panic payload : "));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::ListenerFault).unwrap();
        assert_eq!(json, "\"E002\"");
    }
}
