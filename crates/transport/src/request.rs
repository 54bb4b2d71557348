use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::TransportError;

/// A single HTTP exchange, described independently of any client library.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the transport's default deadline when set.
    pub timeout: Option<Duration>,
    /// Whether the retrying wrapper may re-send this request. Resumable
    /// upload chunks renegotiate offsets themselves and must not be
    /// replayed blindly.
    pub retryable: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            retryable: true,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: Url) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = http::HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(value)?;
        self.headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// A completed HTTP exchange. Non-success statuses are data here, not
/// errors: the engine decides what a 403 or 416 means in context.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Header value as UTF-8, if present and decodable.
    pub fn header(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The seam between the engine and the network.
///
/// The production implementation is [`crate::HttpTransport`]; tests supply
/// in-memory implementations that speak the same request/response model.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one HTTP exchange. Returns `Ok` for any received response,
    /// `Err` only for transport-level failures (network, timeout).
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Release held connections. Safe to call more than once.
    async fn shutdown(&self) {}
}
