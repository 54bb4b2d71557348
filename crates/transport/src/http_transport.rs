use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{is_retryable_status, TransportError};
use crate::request::{ApiRequest, ApiResponse, Transport};
use crate::token::{Anonymous, TokenProvider};

/// Knobs for the reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline applied to every request unless the request overrides it.
    pub request_timeout: Duration,
    /// Maximum attempts per request, counting the first.
    pub retries: u32,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            retries: 5,
            user_agent: format!("cumulo/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Sleep duration before retry round `attempt` (1-based): randomized
/// exponential growth capped at 32 seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = (rand::random::<f64>() + 2f64.powi(attempt.saturating_sub(1) as i32)).min(32.0);
    Duration::from_secs_f64(secs)
}

/// Production transport: one shared reqwest client, created lazily on first
/// use and released deterministically via [`HttpTransport::close_blocking`]
/// or the async [`Transport::shutdown`].
pub struct HttpTransport {
    // Lazy so constructing a filesystem handle never performs I/O or TLS
    // setup; Mutex<Option<..>> so teardown can run from non-async contexts.
    client: Mutex<Option<Client>>,
    tokens: Arc<dyn TokenProvider>,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(tokens: Arc<dyn TokenProvider>, config: TransportConfig) -> Self {
        Self {
            client: Mutex::new(None),
            tokens,
            config,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Arc::new(Anonymous), TransportConfig::default())
    }

    /// Shared client, created on first use. Idempotent under races: the
    /// slot is checked and filled under one lock.
    fn client(&self) -> Result<Client, TransportError> {
        let mut slot = self.client.lock().expect("client lock poisoned");
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .user_agent(self.config.user_agent.clone())
            .build()?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Synchronous teardown path for contexts where no runtime is
    /// available (e.g. drop glue). Dropping the client releases its
    /// connection pool.
    pub fn close_blocking(&self) {
        self.client.lock().expect("client lock poisoned").take();
    }

    async fn execute_once(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let client = self.client()?;
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(token) = self.tokens.bearer_token().await? {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Network(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(TransportError::Network)?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let attempts = if request.retryable {
            self.config.retries.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            debug!(method = %request.method, url = %request.url, attempt, "request");
            match self.execute_once(&request).await {
                Ok(response) => {
                    if is_retryable_status(response.status) && attempt < attempts {
                        warn!(
                            status = %response.status,
                            url = %request.url,
                            attempt,
                            "transient status, retrying"
                        );
                    } else {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if !(err.is_retryable() && attempt < attempts) {
                        return Err(err);
                    }
                    warn!(error = %err, url = %request.url, attempt, "transport error, retrying");
                }
            }
            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn shutdown(&self) {
        self.close_blocking();
    }
}
