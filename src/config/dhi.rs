//! Dynamic HTTP Interface configuration types.
//!
//! Contains listener addresses, TLS material, connection limits, the response
//! policy and the ordered service provider bindings.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// HTTP interface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhiConfig {
    /// Plain HTTP listen address (empty or absent disables it).
    pub addr1: Option<String>,

    /// HTTPS listen address (empty or absent disables it).
    pub addr2: Option<String>,

    /// TLS material for `addr2`.
    pub tls: TlsConfig,

    /// Redirect plain HTTP requests to `redirect_destination`.
    pub redirect_http: bool,

    /// Redirect target; must be an `https://` URL when redirects are on.
    pub redirect_destination: String,

    /// Maximum size of the request head in bytes.
    pub max_header_size: usize,

    /// Request read timeout in seconds (0 disables).
    pub read_timeout_seconds: u64,

    /// Request execution timeout in seconds (0 disables).
    pub write_timeout_seconds: u64,

    /// Keep-alive idle timeout in seconds (0 disables).
    pub idle_timeout_seconds: u64,

    /// Outcome codes providers may return; anything else becomes 500.
    pub allowed_response_codes: Vec<i32>,

    /// Headers set on every response, applied in order.
    pub response_headers: Vec<ResponseHeader>,

    /// Ordered service provider bindings.
    pub services: Vec<ServiceBinding>,
}

impl Default for DhiConfig {
    fn default() -> Self {
        Self {
            addr1: Some(":8080".to_string()),
            addr2: None,
            tls: TlsConfig::default(),
            redirect_http: false,
            redirect_destination: "https://localhost".to_string(),
            max_header_size: 1024 * 1024,
            read_timeout_seconds: 300,
            write_timeout_seconds: 300,
            idle_timeout_seconds: 300,
            allowed_response_codes: vec![500, 400, 406, 200],
            response_headers: vec![ResponseHeader::new("Content-Type", "application/json")],
            services: vec![ServiceBinding::new("weather", ProviderKind::Weather)],
        }
    }
}

impl DhiConfig {
    /// Read timeout, `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_seconds)
    }

    /// Write timeout, `None` when disabled.
    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.write_timeout_seconds)
    }

    /// Idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_seconds)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate file path (PEM).
    pub cert_path: Option<String>,

    /// Private key file path (PEM).
    pub key_path: Option<String>,
}

/// A static response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl ResponseHeader {
    /// Creates a header entry.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Binds a service code to a provider implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Service code matched against the request `SrID`.
    pub code: String,
    /// Provider handling the code.
    pub provider: ProviderKind,
}

impl ServiceBinding {
    /// Creates a binding.
    pub fn new(code: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            code: code.into(),
            provider,
        }
    }
}

/// Built-in service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Weather forecast lookup.
    Weather,
    /// Returns the seed back to the caller.
    Echo,
}

impl FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weather" => Ok(ProviderKind::Weather),
            "echo" => Ok(ProviderKind::Echo),
            _ => Err(CoreError::config(format!("Unknown service provider: {}", s))),
        }
    }
}
