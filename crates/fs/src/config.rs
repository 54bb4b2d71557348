use std::time::Duration;

use crate::checker::Consistency;
use crate::{GCS_MAX_BLOCK_SIZE, GCS_MIN_BLOCK_SIZE, MAX_BATCH_SIZE, SIMPLE_UPLOAD_THRESHOLD};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Filesystem session configuration.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    /// API endpoint override. When unset, `STORAGE_EMULATOR_HOST` is
    /// honored, then the public endpoint.
    pub endpoint: Option<String>,
    /// Project used for bucket listing at the root.
    pub project: Option<String>,
    /// Read-ahead block size and resumable chunk size for handles.
    pub block_size: usize,
    /// Default integrity check applied to transfers.
    pub consistency: Consistency,
    /// Listing cache expiry; `None` caches for the session lifetime.
    pub cache_ttl: Option<Duration>,
    /// Per-request deadline override passed to the transport.
    pub request_timeout: Option<Duration>,
    /// Objects per batch delete request.
    pub batch_size: usize,
    /// Concurrently scheduled groups during bulk operations.
    pub bulk_concurrency: usize,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            project: None,
            block_size: SIMPLE_UPLOAD_THRESHOLD,
            consistency: Consistency::Md5,
            cache_ttl: None,
            request_timeout: None,
            batch_size: 20,
            bulk_concurrency: 5,
        }
    }
}

impl GcsConfig {
    /// Resolved HTTP location as `http[s]://host`.
    ///
    /// An emulator host without a scheme gets `http://` prepended, which
    /// is what integration harnesses export.
    pub fn location(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        if let Ok(emulator) = std::env::var("STORAGE_EMULATOR_HOST") {
            if !emulator.is_empty() {
                if emulator.starts_with("http://") || emulator.starts_with("https://") {
                    return emulator.trim_end_matches('/').to_string();
                }
                return format!("http://{}", emulator.trim_end_matches('/'));
            }
        }
        DEFAULT_ENDPOINT.to_string()
    }

    /// Chunk size clamped to the server's accepted range.
    pub fn effective_block_size(&self) -> usize {
        self.block_size.clamp(GCS_MIN_BLOCK_SIZE, GCS_MAX_BLOCK_SIZE)
    }

    /// Batch size clamped to the API cap.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}
