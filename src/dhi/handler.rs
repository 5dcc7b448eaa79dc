//! Panic-isolating request handler.
//!
//! Every request runs in its own task. Whatever happens inside (a provider
//! panic, a stalled body, an unknown service) the client receives a
//! well-formed envelope.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::LOCATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::RequestEnvelope;
use super::state::DhiState;
use crate::error::describe_panic;
use crate::provider::ServiceOutcome;

/// Router state for one listener.
#[derive(Clone)]
pub struct ListenerState {
    /// State shared across listeners.
    pub shared: Arc<DhiState>,
    /// Whether the listener terminates TLS.
    pub encrypted: bool,
}

/// Fallback handler for every method and path.
pub async fn handle_request(
    State(listener): State<ListenerState>,
    request: Request,
) -> Response {
    let state = listener.shared;
    let request_id = Uuid::new_v4();
    state.stats.record_request();

    let redirect = if listener.encrypted {
        None
    } else {
        state.redirect.clone()
    };

    debug!(
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
        "Handling request"
    );

    let (parts, body) = request.into_parts();
    let work = tokio::spawn({
        let state = Arc::clone(&state);
        async move { intake(&state, parts, body).await }
    });

    let outcome = match state.write_timeout {
        Some(limit) => {
            let abort = work.abort_handle();
            match timeout(limit, work).await {
                Ok(joined) => settle(joined),
                Err(_) => {
                    abort.abort();
                    warn!(request_id = %request_id, "Request execution timed out");
                    ServiceOutcome::new(
                        500,
                        format!("Request execution exceeded {}s", limit.as_secs()),
                    )
                }
            }
        }
        None => settle(work.await),
    };

    let envelope = state.policy.finalize(outcome, &request_id);
    state.stats.record_outcome(envelope.code);

    let mut response = Response::new(Body::from(envelope.render()));
    if let Some(location) = redirect {
        *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
        response.headers_mut().insert(LOCATION, location);
    }
    state.policy.apply_headers(response.headers_mut());
    response
}

fn settle(joined: Result<ServiceOutcome, JoinError>) -> ServiceOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => ServiceOutcome::new(
            500,
            format!("Panic sighted [{}]", describe_panic(e)),
        ),
        Err(e) => ServiceOutcome::new(500, format!("Request task cancelled [{}]", e)),
    }
}

/// Reads, validates and dispatches a request.
async fn intake(state: &DhiState, parts: Parts, body: Body) -> ServiceOutcome {
    let bytes = match read_body(body, state.read_timeout).await {
        Ok(bytes) => bytes,
        Err(note) => return ServiceOutcome::new(500, format!("Request read failed [{}]", note)),
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return ServiceOutcome::new(400, "Request JSON formatting invalid"),
    };

    let envelope: RequestEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(e) => return ServiceOutcome::new(400, format!("Request unmarshal failed [{}]", e)),
    };

    let Some(service_id) = envelope.service_id.filter(|id| !id.is_empty()) else {
        return ServiceOutcome::new(400, "No service specified");
    };

    state
        .registry
        .dispatch(&parts, &service_id, envelope.seed.unwrap_or_default())
        .await
}

async fn read_body(body: Body, limit: Option<Duration>) -> Result<Bytes, String> {
    let read = axum::body::to_bytes(body, usize::MAX);
    let result = match limit {
        Some(limit) => timeout(limit, read)
            .await
            .map_err(|_| format!("body not received within {}s", limit.as_secs()))?,
        None => read.await,
    };
    result.map_err(|e| e.to_string())
}
