use std::time::Duration;

use http::StatusCode;

/// Errors produced at the HTTP boundary.
///
/// Every variant carries a machine-checkable kind so callers never have to
/// sniff message strings. Timeouts are distinct from generic network
/// failures so callers can tell "try again" from "malformed request".
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("http error {status}: {message}")]
    Http { status: StatusCode, message: String },
    /// The request did not complete within the configured deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection-level failure before a response was received.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// The token provider could not produce a credential.
    #[error("auth token unavailable: {0}")]
    Token(String),
}

/// Status codes the retrying wrapper (and the batch delete engine) treat
/// as transient.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

impl TransportError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => is_retryable_status(*status),
            TransportError::Timeout(_) => true,
            TransportError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Status code of the response, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Network(e) => e.status(),
            _ => None,
        }
    }
}
