//! HTTP boundary for the cumulo filesystem.
//!
//! Everything the engine sends over the wire goes through the [`Transport`]
//! trait: a single async `execute` call taking an [`ApiRequest`] and
//! returning an [`ApiResponse`]. The engine never touches reqwest directly,
//! which keeps the whole transfer stack testable against an in-memory
//! transport.
//!
//! [`HttpTransport`] is the production implementation: a lazily created
//! shared reqwest client with bearer-token injection, per-request timeouts,
//! and a retrying wrapper for the transient-error status set.

mod error;
mod http_transport;
mod request;
mod token;

pub use error::{is_retryable_status, TransportError};
pub use http_transport::{backoff_delay, HttpTransport, TransportConfig};
pub use request::{ApiRequest, ApiResponse, Transport};
pub use token::{Anonymous, StaticToken, TokenProvider};
