//! Service providers and the ordered registry that routes to them.
//!
//! A request names its provider with a service code. The registry scans every
//! registration in order and the last one carrying the code wins, so a later
//! entry shadows an earlier duplicate.

mod echo;
mod weather;

pub use echo::EchoProvider;
pub use weather::WeatherProvider;

use async_trait::async_trait;
use axum::http::request::Parts;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::WeatherCache;
use crate::config::{DhiConfig, ProviderKind, WeatherConfig};
use crate::error::Result;

/// Provider input taken from the request envelope.
pub type Seed = serde_json::Map<String, Value>;

/// What a provider returns: an outcome code, a note and an optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOutcome {
    /// Outcome code, subject to the allowed-code policy.
    pub code: i32,
    /// Human readable note.
    pub note: String,
    /// Payload returned to the caller.
    pub yield_: Option<Value>,
}

impl ServiceOutcome {
    /// Outcome without a payload.
    pub fn new(code: i32, note: impl Into<String>) -> Self {
        Self {
            code,
            note: note.into(),
            yield_: None,
        }
    }

    /// Attaches a payload.
    pub fn with_yield(mut self, payload: Value) -> Self {
        self.yield_ = Some(payload);
        self
    }
}

/// A handler selected by service code.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Serves one request.
    async fn serve(&self, request: &Parts, service_id: &str, seed: Seed) -> ServiceOutcome;
}

struct Registration {
    code: String,
    provider: Arc<dyn ServiceProvider>,
}

/// Ordered service code to provider table. Immutable once handed to the DHI.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Vec<Registration>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registration. A duplicate code shadows the earlier entry.
    pub fn register(&mut self, code: impl Into<String>, provider: Arc<dyn ServiceProvider>) {
        let code = code.into();
        if self.entries.iter().any(|entry| entry.code == code) {
            warn!(service = %code, "Duplicate service code, the later registration wins");
        }
        self.entries.push(Registration { code, provider });
    }

    /// Finds the provider for `code`; the last matching registration wins.
    pub fn resolve(&self, code: &str) -> Option<&Arc<dyn ServiceProvider>> {
        self.entries
            .iter()
            .filter(|entry| entry.code == code)
            .last()
            .map(|entry| &entry.provider)
    }

    /// Routes a request to its provider.
    pub async fn dispatch(&self, request: &Parts, service_id: &str, seed: Seed) -> ServiceOutcome {
        match self.resolve(service_id) {
            Some(provider) => {
                debug!(service = %service_id, "Dispatching to service provider");
                provider.serve(request, service_id, seed).await
            }
            None => ServiceOutcome::new(400, "Service specified not supported"),
        }
    }

    /// Registered codes in order, each flagged when a later entry shadows it.
    pub fn codes(&self) -> Vec<(&str, bool)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let shadowed = self.entries[index + 1..]
                    .iter()
                    .any(|later| later.code == entry.code);
                (entry.code.as_str(), shadowed)
            })
            .collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the registry from the configured service bindings.
pub fn build_registry(
    config: &DhiConfig,
    weather: &WeatherConfig,
    cache: Arc<WeatherCache>,
) -> Result<ServiceRegistry> {
    let mut registry = ServiceRegistry::new();
    let mut weather_provider: Option<Arc<dyn ServiceProvider>> = None;

    for binding in &config.services {
        let provider: Arc<dyn ServiceProvider> = match binding.provider {
            ProviderKind::Weather => match &weather_provider {
                Some(existing) => Arc::clone(existing),
                None => {
                    let created: Arc<dyn ServiceProvider> =
                        Arc::new(WeatherProvider::new(weather.clone(), Arc::clone(&cache))?);
                    weather_provider = Some(Arc::clone(&created));
                    created
                }
            },
            ProviderKind::Echo => Arc::new(EchoProvider),
        };
        registry.register(binding.code.clone(), provider);
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ServiceBinding};
    use axum::http::Request;
    use serde_json::json;

    struct Fixed(i32);

    #[async_trait]
    impl ServiceProvider for Fixed {
        async fn serve(&self, _request: &Parts, _service_id: &str, _seed: Seed) -> ServiceOutcome {
            ServiceOutcome::new(self.0, format!("fixed {}", self.0))
        }
    }

    fn parts() -> Parts {
        Request::builder().body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_dispatch_unknown_service() {
        let registry = ServiceRegistry::new();
        let outcome = registry.dispatch(&parts(), "nope", Seed::new()).await;

        assert_eq!(outcome.code, 400);
        assert_eq!(outcome.note, "Service specified not supported");
        assert!(outcome.yield_.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_code_last_registration_wins() {
        let mut registry = ServiceRegistry::new();
        registry.register("dup", Arc::new(Fixed(200)));
        registry.register("other", Arc::new(Fixed(406)));
        registry.register("dup", Arc::new(Fixed(400)));

        let outcome = registry.dispatch(&parts(), "dup", Seed::new()).await;
        assert_eq!(outcome.code, 400);
        assert_eq!(outcome.note, "fixed 400");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_codes_flag_shadowed() {
        let mut registry = ServiceRegistry::new();
        registry.register("dup", Arc::new(Fixed(200)));
        registry.register("echo", Arc::new(EchoProvider));
        registry.register("dup", Arc::new(Fixed(400)));

        assert_eq!(
            registry.codes(),
            vec![("dup", true), ("echo", false), ("dup", false)]
        );
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = ServiceOutcome::new(200, "Data").with_yield(json!({"a": 1}));
        assert_eq!(outcome.code, 200);
        assert_eq!(outcome.yield_, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_build_registry_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let cache_config = CacheConfig {
            file_path: dir.path().join("cache.json").to_string_lossy().into_owned(),
            ..Default::default()
        };
        let cache = Arc::new(WeatherCache::from_config(&cache_config));

        let config = DhiConfig {
            services: vec![
                ServiceBinding::new("weather", ProviderKind::Weather),
                ServiceBinding::new("echo", ProviderKind::Echo),
                ServiceBinding::new("forecast", ProviderKind::Weather),
            ],
            ..Default::default()
        };

        let registry = build_registry(&config, &WeatherConfig::default(), cache).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("weather").is_some());
        assert!(registry.resolve("missing").is_none());

        let outcome = registry
            .dispatch(&parts(), "echo", json!({"x": 1}).as_object().cloned().unwrap())
            .await;
        assert_eq!(outcome.code, 200);
    }
}
