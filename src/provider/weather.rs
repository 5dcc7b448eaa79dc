//! Weather forecast provider backed by the Open-Meteo APIs.
//!
//! Lookups go through the [`WeatherCache`]: a fresh entry is served directly,
//! and a stale one covers for an unreachable forecast upstream.

use async_trait::async_trait;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::{Seed, ServiceOutcome, ServiceProvider};
use crate::cache::WeatherCache;
use crate::config::WeatherConfig;
use crate::error::{CoreError, Result};

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,is_day,\
wind_speed_10m,wind_direction_10m,precipitation,cloud_cover,wind_gusts_10m";
const HOURLY_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,precipitation,cloud_cover,wind_speed_10m,sunshine_duration";
const DAILY_FIELDS: &str =
    "cloud_cover_mean,temperature_2m_mean,winddirection_10m_dominant,wind_speed_10m_mean";

#[derive(Debug, Error)]
enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("geocoding service returned an error: {0}")]
    Status(#[source] reqwest::Error),

    #[error("failed to parse geocoding response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("city not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: CurrentWeather,
    #[serde(default)]
    hourly: HourlyWeather,
    #[serde(default)]
    daily: DailyWeather,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    apparent_temperature: f64,
    is_day: i32,
    precipitation: f64,
    cloud_cover: f64,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
    wind_gusts_10m: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct HourlyWeather {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
    relative_humidity_2m: Vec<f64>,
    precipitation: Vec<f64>,
    cloud_cover: Vec<f64>,
    wind_speed_10m: Vec<f64>,
    sunshine_duration: Vec<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DailyWeather {
    time: Vec<String>,
    cloud_cover_mean: Vec<f64>,
    temperature_2m_mean: Vec<f64>,
    winddirection_10m_dominant: Vec<f64>,
    wind_speed_10m_mean: Vec<f64>,
}

/// Weather forecast lookup by city and date range.
pub struct WeatherProvider {
    client: reqwest::Client,
    config: WeatherConfig,
    cache: Arc<WeatherCache>,
}

impl WeatherProvider {
    /// Creates the provider with its own HTTP client.
    pub fn new(config: WeatherConfig, cache: Arc<WeatherCache>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("daemoncore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::upstream_with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            config,
            cache,
        })
    }

    async fn geocode(&self, city: &str) -> std::result::Result<(f64, f64), GeocodeError> {
        let response = self
            .client
            .get(&self.config.geocoding_url)
            .query(&[
                ("name", city),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ])
            .timeout(Duration::from_secs(self.config.geocoding_timeout_seconds))
            .send()
            .await
            .map_err(GeocodeError::Request)?
            .error_for_status()
            .map_err(GeocodeError::Status)?;

        let body: GeocodingResponse = response.json().await.map_err(GeocodeError::Parse)?;
        body.results
            .first()
            .map(|place| (place.latitude, place.longitude))
            .ok_or_else(|| GeocodeError::NotFound(city.to_string()))
    }
}

fn required<'a>(seed: &'a Seed, field: &str) -> Option<&'a str> {
    seed.get(field)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl ServiceProvider for WeatherProvider {
    async fn serve(&self, _request: &Parts, service_id: &str, seed: Seed) -> ServiceOutcome {
        let Some(city) = required(&seed, "city") else {
            return ServiceOutcome::new(400, "missing city");
        };
        let Some(start_date) = required(&seed, "start_date") else {
            return ServiceOutcome::new(400, "missing start_date");
        };
        let Some(end_date) = required(&seed, "end_date") else {
            return ServiceOutcome::new(400, "missing end_date");
        };

        let key = WeatherCache::key(city, start_date, end_date);
        if let Some(data) = self.cache.get(&key) {
            info!(service = %service_id, city = %city, "Serving weather from cache");
            return ServiceOutcome::new(200, "Weather data retrieved from cache").with_yield(data);
        }

        let (latitude, longitude) = match self.geocode(city).await {
            Ok(coordinates) => coordinates,
            Err(e) => return ServiceOutcome::new(400, format!("failed to geocode city: {}", e)),
        };

        let sent = self
            .client
            .get(&self.config.forecast_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
                ("start_date", start_date.to_string()),
                ("end_date", end_date.to_string()),
            ])
            .timeout(Duration::from_secs(self.config.forecast_timeout_seconds))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(service = %service_id, city = %city, error = %e, "Forecast upstream unreachable");
                if let Some((data, age)) = self.cache.get_stale(&key, self.cache.stale_max_age()) {
                    info!(
                        service = %service_id,
                        city = %city,
                        age_seconds = age.as_secs(),
                        "Serving weather from stale cache"
                    );
                    return ServiceOutcome::new(200, "Weather data retrieved from stale cache")
                        .with_yield(data);
                }
                return ServiceOutcome::new(502, "failed to contact weather service");
            }
        };

        let forecast: ForecastResponse = match response.json().await {
            Ok(forecast) => forecast,
            Err(e) => {
                warn!(service = %service_id, error = %e, "Forecast response not parseable");
                return ServiceOutcome::new(500, "failed to parse weather response");
            }
        };

        let data = json!({
            "city": city,
            "location": { "latitude": latitude, "longitude": longitude },
            "current": forecast.current,
            "hourly": forecast.hourly,
            "daily": forecast.daily,
        });
        self.cache.set(key, data.clone());

        ServiceOutcome::new(200, "Weather data retrieved successfully").with_yield(data)
    }
}
