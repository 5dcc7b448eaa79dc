//! Echo provider.

use async_trait::async_trait;
use axum::http::request::Parts;
use serde_json::{json, Value};

use super::{Seed, ServiceOutcome, ServiceProvider};

/// Returns the service id and the seed unchanged.
pub struct EchoProvider;

#[async_trait]
impl ServiceProvider for EchoProvider {
    async fn serve(&self, _request: &Parts, service_id: &str, seed: Seed) -> ServiceOutcome {
        ServiceOutcome::new(200, "Data").with_yield(json!({
            "service": service_id,
            "seed": Value::Object(seed),
        }))
    }
}
