//! Configuration module for daemoncore.
//!
//! This module provides all configuration types and loading functionality.
//! Configuration can be loaded from YAML files and environment variables.

mod cache;
mod daemon;
mod dhi;
mod logging;

pub use cache::{CacheConfig, WeatherConfig};
pub use daemon::{default_daemons, DaemonConfig, ProgramKind};
pub use dhi::{DhiConfig, ProviderKind, ResponseHeader, ServiceBinding, TlsConfig};
pub use logging::{LogFormat, LogLevel, LogOutput, LoggingConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/daemoncore/config.yaml";

/// Environment variable naming the configuration file.
pub const ENV_CONFIG: &str = "DAEMONCORE_CONFIG";

const ENV_LOG_LEVEL: &str = "DAEMONCORE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "DAEMONCORE_LOG_FORMAT";
const ENV_HTTP_ADDR: &str = "DAEMONCORE_HTTP_ADDR";
const ENV_HTTPS_ADDR: &str = "DAEMONCORE_HTTPS_ADDR";
const ENV_CACHE_FILE: &str = "DAEMONCORE_CACHE_FILE";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Ordered daemon list.
    pub daemons: Vec<DaemonConfig>,

    /// HTTP interface configuration.
    pub dhi: DhiConfig,

    /// Weather cache configuration.
    pub cache: CacheConfig,

    /// Weather upstream configuration.
    pub weather: WeatherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            daemons: default_daemons(),
            dhi: DhiConfig::default(),
            cache: CacheConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional path.
    ///
    /// Resolution order: the explicit path, then `DAEMONCORE_CONFIG`, then the
    /// default location. A missing default file yields the built-in defaults.
    /// Environment overrides apply before validation.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let explicit = path
            .map(|p| p.as_ref().to_path_buf())
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::parse_file(&p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::parse_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a YAML string.
    pub fn load_from_str(content: &str) -> Result<Self> {
        let config = Self::parse_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::parse_str(&content)
    }

    fn parse_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CoreError::config(format!("Failed to parse config: {}", e)))
    }

    /// Applies overrides from a variable lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level.parse()?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse()?;
        }
        if let Some(addr) = lookup(ENV_HTTP_ADDR) {
            self.dhi.addr1 = Some(addr);
        }
        if let Some(addr) = lookup(ENV_HTTPS_ADDR) {
            self.dhi.addr2 = Some(addr);
        }
        if let Some(path) = lookup(ENV_CACHE_FILE) {
            self.cache.file_path = path;
        }
        Ok(())
    }

    /// Validates configuration.
    ///
    /// Listener-level checks belong to the HTTP interface's own startup and
    /// are not repeated here.
    pub fn validate(&self) -> Result<()> {
        // Validate daemons
        let mut names = HashSet::new();
        for daemon in &self.daemons {
            if daemon.name.trim().is_empty() {
                return Err(CoreError::config("daemons[].name must not be empty"));
            }
            if !names.insert(daemon.name.as_str()) {
                return Err(CoreError::config(format!(
                    "daemons: duplicate daemon name '{}'",
                    daemon.name
                )));
            }
        }

        // Validate logging
        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(CoreError::config(
                "logging.file_path is required when output is file",
            ));
        }

        // Validate cache
        if self.cache.ttl_seconds == 0 {
            return Err(CoreError::config("cache.ttl_seconds must be > 0"));
        }
        if self.cache.cleanup_interval_seconds == 0 {
            return Err(CoreError::config(
                "cache.cleanup_interval_seconds must be > 0",
            ));
        }

        // Validate service bindings
        for binding in &self.dhi.services {
            if binding.code.is_empty() {
                return Err(CoreError::config("dhi.services[].code must not be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.daemons.len(), 2);
        assert_eq!(config.dhi.addr1.as_deref(), Some(":8080"));
        assert_eq!(config.cache.ttl_seconds, 1800);
        assert_eq!(config.weather.forecast_timeout_seconds, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
logging:
  level: debug
  format: json

daemons:
  - name: janitor
    program: cache_janitor
    startup_grace_ms: 100
  - name: web
    program: dhi
  - name: idle

dhi:
  addr1: "127.0.0.1:9090"
  redirect_http: true
  redirect_destination: "https://example.org"
  allowed_response_codes: [200, 400, 500, 502]
  response_headers:
    - name: Content-Type
      value: application/json
    - name: X-Served-By
      value: daemoncore
  services:
    - code: weather
      provider: weather
    - code: echo
      provider: echo

cache:
  file_path: "/tmp/cache.json"
  ttl_seconds: 60
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load_from_path(file.path()).unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.daemons.len(), 3);
        assert_eq!(config.daemons[0].startup_grace_ms, 100);
        assert_eq!(config.daemons[1].program, Some(ProgramKind::Dhi));
        assert!(config.daemons[2].program.is_none());
        assert!(config.dhi.redirect_http);
        assert_eq!(config.dhi.response_headers.len(), 2);
        assert_eq!(config.dhi.services[1].provider, ProviderKind::Echo);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.cache.stale_max_age_seconds, 86400);
    }

    #[test]
    fn test_validation_duplicate_daemon_name() {
        let yaml = r#"
daemons:
  - name: same
  - name: same
"#;
        let result = Config::load_from_str(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_validation_empty_daemon_name() {
        let yaml = r#"
daemons:
  - name: ""
"#;
        let result = Config::load_from_str(yaml);
        assert!(result.unwrap_err().to_string().contains("name"));
    }

    #[test]
    fn test_validation_file_output_without_path() {
        let yaml = r#"
logging:
  output: file
"#;
        let result = Config::load_from_str(yaml);
        assert!(result.unwrap_err().to_string().contains("file_path"));
    }

    #[test]
    fn test_validation_zero_ttl() {
        let yaml = r#"
cache:
  ttl_seconds: 0
"#;
        let result = Config::load_from_str(yaml);
        assert!(result.unwrap_err().to_string().contains("ttl_seconds"));
    }

    #[test]
    fn test_validation_empty_service_code() {
        let yaml = r#"
dhi:
  services:
    - code: ""
      provider: echo
"#;
        let result = Config::load_from_str(yaml);
        assert!(result.unwrap_err().to_string().contains("code"));
    }

    #[test]
    fn test_dhi_checks_not_in_validate() {
        // A config without listeners is loadable; the interface rejects it at startup.
        let yaml = r#"
dhi:
  addr1: ""
  redirect_http: true
  redirect_destination: "ftp://nowhere"
"#;
        assert!(Config::load_from_str(yaml).is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DAEMONCORE_LOG_LEVEL", "warn"),
            ("DAEMONCORE_LOG_FORMAT", "json"),
            ("DAEMONCORE_HTTP_ADDR", "127.0.0.1:1080"),
            ("DAEMONCORE_HTTPS_ADDR", ":1443"),
            ("DAEMONCORE_CACHE_FILE", "/var/lib/daemoncore/cache.json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.dhi.addr1.as_deref(), Some("127.0.0.1:1080"));
        assert_eq!(config.dhi.addr2.as_deref(), Some(":1443"));
        assert_eq!(config.cache.file_path, "/var/lib/daemoncore/cache.json");
    }

    #[test]
    fn test_apply_overrides_rejects_bad_level() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "DAEMONCORE_LOG_LEVEL").then(|| "chatty".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let result = Config::load(Some("/nonexistent/daemoncore.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(yaml.contains("daemons:"));
        assert!(yaml.contains("addr1:"));
        assert!(yaml.contains("cache_janitor"));
    }
}
