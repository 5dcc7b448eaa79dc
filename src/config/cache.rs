//! Weather cache and weather upstream configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weather cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persistent cache file.
    pub file_path: String,

    /// Freshness window in seconds.
    pub ttl_seconds: u64,

    /// Entries older than this are evicted and never served.
    pub stale_max_age_seconds: u64,

    /// Janitor sweep interval in seconds.
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_path: "weather_cache.json".to_string(),
            ttl_seconds: 30 * 60,
            stale_max_age_seconds: 24 * 60 * 60,
            cleanup_interval_seconds: 10 * 60,
        }
    }
}

impl CacheConfig {
    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Stale horizon.
    pub fn stale_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_max_age_seconds)
    }

    /// Janitor sweep interval.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

/// Weather upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Geocoding search endpoint.
    pub geocoding_url: String,

    /// Forecast endpoint.
    pub forecast_url: String,

    /// Geocoding request timeout in seconds.
    pub geocoding_timeout_seconds: u64,

    /// Forecast request timeout in seconds.
    pub forecast_timeout_seconds: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            geocoding_timeout_seconds: 5,
            forecast_timeout_seconds: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.file_path, "weather_cache.json");
        assert_eq!(config.ttl(), Duration::from_secs(1800));
        assert_eq!(config.stale_max_age(), Duration::from_secs(86400));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_weather_config_default() {
        let config = WeatherConfig::default();
        assert!(config.geocoding_url.starts_with("https://"));
        assert!(config.forecast_url.ends_with("/v1/forecast"));
        assert_eq!(config.geocoding_timeout_seconds, 5);
        assert_eq!(config.forecast_timeout_seconds, 10);
    }
}
