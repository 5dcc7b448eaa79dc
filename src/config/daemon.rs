//! Daemon registration configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// One entry of the ordered daemon list.
///
/// Registration order matters: shutdown runs in reverse, so a daemon should
/// be listed after the daemons it depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon name used in logs.
    pub name: String,

    /// Program to run. Absent means the daemon is skipped at startup.
    #[serde(default)]
    pub program: Option<ProgramKind>,

    /// Startup handshake grace in milliseconds (0 disables the timer).
    #[serde(default = "default_grace_ms")]
    pub startup_grace_ms: u64,

    /// Shutdown acknowledgement grace in milliseconds (0 disables the timer).
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_grace_ms() -> u64 {
    5000
}

impl DaemonConfig {
    /// Creates an entry with default grace periods.
    pub fn new(name: impl Into<String>, program: Option<ProgramKind>) -> Self {
        Self {
            name: name.into(),
            program,
            startup_grace_ms: default_grace_ms(),
            shutdown_grace_ms: default_grace_ms(),
        }
    }

    /// Startup grace as a duration.
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Shutdown grace as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Built-in daemon programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    /// The Dynamic HTTP Interface.
    Dhi,

    /// Periodic weather cache eviction.
    CacheJanitor,
}

impl FromStr for ProgramKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dhi" => Ok(ProgramKind::Dhi),
            "cache_janitor" | "cache-janitor" => Ok(ProgramKind::CacheJanitor),
            _ => Err(CoreError::config(format!("Unknown daemon program: {}", s))),
        }
    }
}

/// Default daemon list: the cache janitor first, the HTTP interface after it.
pub fn default_daemons() -> Vec<DaemonConfig> {
    vec![
        DaemonConfig::new("cache-janitor", Some(ProgramKind::CacheJanitor)),
        DaemonConfig::new("DHI0", Some(ProgramKind::Dhi)),
    ]
}
