use crate::model::descriptor::Protocol;
use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Structured failure of one wire-level service call.
///
/// Carries enough of the original request to diagnose the failure without
/// re-deriving it from the batch: protocol, HTTP status, and the raw
/// response payload exactly as the server sent it.
#[derive(Debug, Clone, Error)]
#[error("{protocol} service error (HTTP {status}): {message}")]
pub struct ServiceError {
    pub protocol: Protocol,
    pub status: u16,
    /// Raw response payload for the failing part, unparsed.
    pub payload: String,
    /// Short human-readable summary extracted from the payload when possible.
    pub message: String,
}

impl ServiceError {
    pub fn new(protocol: Protocol, status: u16, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let message = Self::extract_message(&payload)
            .unwrap_or_else(|| format!("request failed with status {}", status));
        Self {
            protocol,
            status,
            payload,
            message,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Best-effort extraction of an error message from common OData / Graph
    /// error envelopes. Falls back to `None` for opaque payloads.
    fn extract_message(payload: &str) -> Option<String> {
        let json: serde_json::Value = serde_json::from_str(payload).ok()?;
        let error = json
            .get("error")
            .or_else(|| json.get("odata.error").or_else(|| json.pointer("/d/error")))?;
        error
            .get("message")
            .map(|m| match m {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("value")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .filter(|s| !s.is_empty())
    }
}

/// Unified error type for the batching engine.
///
/// Mirrors the failure taxonomy of the wire protocols: pre-flight token
/// resolution is fatal before any network call; per-part service failures
/// are recoverable into [`crate::model::batch::BatchResult`]s unless the
/// batch is configured to throw; decode failures are server contract
/// violations and always fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// A request target still contains unresolved `{token}` placeholders.
    /// Raised pre-flight; no network call is made.
    #[error("unresolved token in request target: {target}")]
    TokenResolution { target: String },

    /// A wire-level service call failed with a protocol error.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A retryable sub-batch did not resolve within the configured budget.
    #[error(
        "retry budget exceeded for {protocol} sub-batch of {request_count} request(s) after {attempts} attempt(s)"
    )]
    RetryBudgetExceeded {
        protocol: Protocol,
        attempts: u32,
        request_count: usize,
    },

    /// The server returned a response the protocol decoder cannot interpret.
    #[error("malformed {protocol} response: {message}")]
    Decode { protocol: Protocol, message: String },

    /// Network-level failure reported by the HTTP client.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The batch or engine configuration is inconsistent.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Execution was cancelled through the cancellation token.
    #[error("execution cancelled")]
    Cancelled,
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn decode(protocol: Protocol, message: impl Into<String>) -> Self {
        Error::Decode {
            protocol,
            message: message.into(),
        }
    }

    /// Whether the engine may transparently retry after this error.
    /// Only transport-level failures qualify; everything else is either
    /// final or already routed through the retryable-status path.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
