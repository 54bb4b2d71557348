use async_trait::async_trait;

use crate::error::TransportError;

/// Credential source for outgoing requests.
///
/// Token acquisition and refresh live outside this workspace; this trait is
/// only the seam through which a bearer token reaches the transport.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Current bearer token, or `None` for unauthenticated access.
    async fn bearer_token(&self) -> Result<Option<String>, TransportError>;
}

/// No credentials; suitable for public buckets and emulators.
#[derive(Debug, Clone, Default)]
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn bearer_token(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

/// A fixed token supplied by the caller.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken").field(&"<redacted>").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, TransportError> {
        Ok(Some(self.0.clone()))
    }
}
