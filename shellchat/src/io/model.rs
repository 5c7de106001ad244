//! Model client abstraction.
//!
//! The [`ModelClient`] trait decouples the conversation loop from the HTTP
//! providers. Tests use scripted clients that replay canned output items.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use ureq::Agent;

use crate::core::transcript::Transcript;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("model API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode model response: {0}")]
    Decode(String),
}

impl ModelError {
    /// Errors worth another attempt: network failures, rate limits, server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Transport { .. } => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::Decode(_) => false,
        }
    }
}

/// A model that answers a full transcript with raw output items.
pub trait ModelClient {
    /// Send the whole transcript; return the response's output items in order.
    fn respond(&self, transcript: &Transcript) -> Result<Vec<Value>, ModelError>;
}

/// Blocking JSON-over-HTTP helper shared by the providers.
#[derive(Debug, Clone)]
pub(crate) struct JsonHttp {
    agent: Agent,
}

impl JsonHttp {
    pub(crate) fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }

    #[instrument(skip_all, fields(url = %url))]
    pub(crate) fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<Value, ModelError> {
        let mut request = self.agent.post(url);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let mut response = request
            .send_json(body)
            .map_err(|err| ModelError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        let status = response.status().as_u16();
        let raw = response
            .body_mut()
            .read_to_string()
            .map_err(|err| ModelError::Transport {
                url: url.to_string(),
                message: format!("read body: {err}"),
            })?;
        debug!(status, bytes = raw.len(), "model response received");

        if !(200..300).contains(&status) {
            warn!(status, "model API returned an error status");
            return Err(ModelError::Api {
                status,
                message: api_error_message(&raw),
            });
        }
        serde_json::from_str(&raw).map_err(|err| ModelError::Decode(err.to_string()))
    }
}

/// Pull a readable message out of an error body (`{"error": {"message": ..}}`
/// or `{"error": ".."}`), falling back to the raw text.
fn api_error_message(raw: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(raw).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
    });
    match message {
        Some(message) => message.to_string(),
        None if raw.trim().is_empty() => "empty response body".to_string(),
        None => raw.trim().to_string(),
    }
}
