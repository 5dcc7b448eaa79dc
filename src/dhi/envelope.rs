//! Request and response envelopes, and the policy that shapes responses.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::collections::HashSet;
use tracing::error;
use uuid::Uuid;

use crate::config::DhiConfig;
use crate::error::{CoreError, Result};
use crate::provider::{Seed, ServiceOutcome};

/// Decoded request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    /// Service code used for routing.
    #[serde(rename = "SrID", default)]
    pub service_id: Option<String>,

    /// Provider input.
    #[serde(rename = "Seed", default)]
    pub seed: Option<Seed>,
}

/// Response body written for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Final outcome code.
    #[serde(rename = "ExecutionOutcomeCode")]
    pub code: i32,

    /// Outcome note, never present on a 500.
    #[serde(
        rename = "ExecutionOutcomeNote",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub note: Option<String>,

    /// Provider payload.
    #[serde(rename = "Yield", default, skip_serializing_if = "Option::is_none")]
    pub yield_: Option<Value>,
}

impl ResponseEnvelope {
    /// Serializes as 4-space indented JSON with a trailing newline.
    pub fn render(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"    "));

        if let Err(e) = self.serialize(&mut serializer) {
            error!(error = %e, "Failed to serialize response envelope");
            body = b"{\n    \"ExecutionOutcomeCode\": 500\n}".to_vec();
        }
        body.push(b'\n');
        body
    }
}

/// Allowed outcome codes and static headers applied to every response.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    allowed: HashSet<i32>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponsePolicy {
    /// Creates a policy from already parsed parts.
    pub fn new(allowed: impl IntoIterator<Item = i32>, headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            headers,
        }
    }

    /// Builds the policy from configuration, rejecting malformed headers.
    pub fn from_config(config: &DhiConfig) -> Result<Self> {
        let headers = config
            .response_headers
            .iter()
            .map(|header| {
                let name = HeaderName::try_from(header.name.as_str()).map_err(|e| {
                    CoreError::config_with_source(
                        format!("Invalid response header name '{}'", header.name),
                        e,
                    )
                })?;
                let value = HeaderValue::try_from(header.value.as_str()).map_err(|e| {
                    CoreError::config_with_source(
                        format!("Invalid value for response header '{}'", header.name),
                        e,
                    )
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(config.allowed_response_codes.iter().copied(), headers))
    }

    /// Turns a provider outcome into the client-visible envelope.
    ///
    /// Codes outside the allowed set become 500. A 500 note is logged and
    /// withheld from the client.
    pub fn finalize(&self, outcome: ServiceOutcome, request_id: &Uuid) -> ResponseEnvelope {
        let ServiceOutcome {
            mut code,
            mut note,
            yield_,
        } = outcome;

        if code != 500 && !self.allowed.contains(&code) {
            note = format!("Unexpected response code {}", code);
            code = 500;
        }

        let note = if code == 500 {
            error!(request_id = %request_id, note = %note, "Request failed");
            None
        } else {
            Some(note)
        };

        ResponseEnvelope {
            code,
            note,
            yield_: yield_.filter(|payload| !payload.is_null()),
        }
    }

    /// Sets every configured header, replacing existing values.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}
