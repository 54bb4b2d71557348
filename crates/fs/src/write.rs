//! Buffered writes with automatic upload-strategy selection.
//!
//! Content accumulates locally until the buffer crosses the handle's
//! block size; at that point a resumable session starts and full blocks
//! stream out as the caller keeps writing. Payloads that never cross the
//! threshold go up in a single multipart request at close.
//!
//! Resumable chunks are never blindly replayed. The server may accept a
//! prefix of a chunk (it answers with a `Range` header naming the last
//! byte it holds); the handle drops the accepted prefix from its buffer,
//! advances the confirmed offset, and re-sends only the remainder. The
//! integrity checker is fed exactly the accepted bytes, so it stays in
//! step with what the server has regardless of how many renegotiations a
//! chunk takes.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use http::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use transport::ApiRequest;
use url::Url;

use crate::cache::ListingCache;
use crate::checker::{Consistency, ConsistencyChecker};
use crate::client::GcsClient;
use crate::error::GcsError;
use crate::record::{FixedKeyMetadata, ObjectResource};
use crate::GCS_MIN_BLOCK_SIZE;

const MULTIPART_BOUNDARY: &str = "==0==";

/// Object attributes set at creation time.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    /// Free-form user metadata.
    pub metadata: HashMap<String, String>,
    pub fixed_key: FixedKeyMetadata,
    /// Override the session-wide integrity check for this transfer.
    pub consistency: Option<Consistency>,
}

impl WriteOptions {
    fn metadata_json(&self, key: &str) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("name".into(), serde_json::Value::String(key.into()));
        if let Some(content_type) = &self.content_type {
            object.insert(
                "contentType".into(),
                serde_json::Value::String(content_type.clone()),
            );
        }
        if !self.metadata.is_empty() {
            object.insert(
                "metadata".into(),
                serde_json::to_value(&self.metadata).unwrap_or_default(),
            );
        }
        self.fixed_key.apply_to(&mut object);
        serde_json::Value::Object(object)
    }
}

pub struct WriteHandle {
    client: GcsClient,
    bucket: String,
    key: String,
    options: WriteOptions,
    block_size: usize,
    buffer: BytesMut,
    /// Bytes the server has confirmed receiving.
    offset: u64,
    /// Resumable session URL, once initiated.
    session: Option<Url>,
    checker: ConsistencyChecker,
    cache: Arc<Mutex<ListingCache>>,
    result: Option<ObjectResource>,
    closed: bool,
}

impl WriteHandle {
    pub(crate) fn new(
        client: GcsClient,
        cache: Arc<Mutex<ListingCache>>,
        bucket: String,
        key: String,
        options: WriteOptions,
    ) -> Self {
        let mode = options.consistency.unwrap_or(client.config().consistency);
        let block_size = client.config().effective_block_size();
        Self {
            client,
            bucket,
            key,
            options,
            block_size,
            buffer: BytesMut::new(),
            offset: 0,
            session: None,
            checker: ConsistencyChecker::new(mode),
            cache,
            result: None,
            closed: false,
        }
    }

    fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    /// Append bytes, streaming out full blocks once past the threshold.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), GcsError> {
        if self.closed {
            return Err(GcsError::UploadState("write after close".into()));
        }
        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= self.block_size {
            self.ensure_session().await?;
            self.send_chunk(false).await?;
        }
        Ok(())
    }

    /// Finish the upload and return the created object's resource.
    /// Idempotent: a second call returns the same resource.
    pub async fn close(&mut self) -> Result<ObjectResource, GcsError> {
        if let Some(resource) = &self.result {
            return Ok(resource.clone());
        }
        if self.closed {
            return Err(GcsError::UploadState("upload was discarded".into()));
        }
        let resource = if self.session.is_none() {
            self.simple_upload().await?
        } else {
            loop {
                if let Some(resource) = self.send_chunk(true).await? {
                    break resource;
                }
            }
        };
        self.checker.validate_json(&resource)?;
        self.cache.lock().await.invalidate(&self.path());
        self.result = Some(resource.clone());
        self.closed = true;
        Ok(resource)
    }

    /// Abandon the upload. An active resumable session is cancelled on
    /// the server; buffered content is dropped.
    pub async fn discard(&mut self) -> Result<(), GcsError> {
        if self.closed {
            return Err(GcsError::UploadState("discard after close".into()));
        }
        if let Some(session) = self.session.take() {
            debug!(path = %self.path(), "discarding resumable session");
            self.client.send(ApiRequest::delete(session)).await?;
        }
        self.buffer.clear();
        self.closed = true;
        Ok(())
    }

    pub fn bytes_confirmed(&self) -> u64 {
        self.offset
    }

    /// Bytes eligible to go out in the next chunk. Non-final chunks must
    /// be a multiple of the server granularity; the final chunk drains
    /// everything.
    fn sendable_len(&self, finalize: bool) -> usize {
        if finalize {
            self.buffer.len()
        } else {
            (self.buffer.len() / GCS_MIN_BLOCK_SIZE) * GCS_MIN_BLOCK_SIZE
        }
    }

    async fn ensure_session(&mut self) -> Result<(), GcsError> {
        if self.session.is_some() {
            return Ok(());
        }
        let mut url = self.client.upload_url(&self.bucket)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable");
        let request = ApiRequest::post(url).json(&self.options.metadata_json(&self.key))?;
        let response = self.client.send_expect(request, &self.path()).await?;
        let location = response
            .header(http::header::LOCATION)
            .ok_or_else(|| GcsError::UploadState("no session location in response".into()))?;
        let session = Url::parse(location).map_err(transport::TransportError::from)?;
        debug!(path = %self.path(), "resumable session initiated");
        self.session = Some(session);
        Ok(())
    }

    /// Send one chunk against the session. Returns the object resource
    /// once the server reports the upload complete.
    async fn send_chunk(&mut self, finalize: bool) -> Result<Option<ObjectResource>, GcsError> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| GcsError::UploadState("chunk without a session".into()))?;
        let l = self.sendable_len(finalize);

        let content_range = if l == 0 {
            if !finalize {
                return Ok(None);
            }
            // Empty finalizer: the declared total closes the session.
            format!("bytes */{}", self.offset)
        } else {
            let total = if finalize {
                (self.offset + l as u64).to_string()
            } else {
                "*".to_string()
            };
            format!("bytes {}-{}/{}", self.offset, self.offset + l as u64 - 1, total)
        };

        // Offset renegotiation happens here, not in a replaying wrapper.
        let request = ApiRequest::post(session)
            .header(http::header::CONTENT_RANGE, &content_range)
            .body(Bytes::copy_from_slice(&self.buffer[..l]))
            .no_retry();
        let response = self.client.send(request).await?;

        if response.status == StatusCode::PERMANENT_REDIRECT
            || response.headers.contains_key(http::header::RANGE)
        {
            // Partial acceptance: `Range: bytes=0-{end}` names the last
            // byte the server holds. A 308 with no Range header means it
            // holds nothing yet.
            let confirmed = match response.header(http::header::RANGE) {
                Some(value) => parse_range_end(value)
                    .map(|end| end + 1)
                    .ok_or_else(|| {
                        GcsError::UploadState("unparseable range in chunk response".into())
                    })?,
                None => 0,
            };
            if confirmed < self.offset {
                return Err(GcsError::UploadState(format!(
                    "server acknowledged {confirmed} bytes, before this chunk's start"
                )));
            }
            let accepted = ((confirmed - self.offset) as usize).min(l);
            let shortfall = l - accepted;
            if shortfall > 0 {
                warn!(
                    path = %self.path(),
                    accepted,
                    shortfall,
                    "chunk partially accepted, re-sending remainder"
                );
            }
            self.checker.update(&self.buffer[..accepted]);
            self.buffer.advance(accepted);
            self.offset += accepted as u64;
            return Ok(None);
        }

        if !response.status.is_success() {
            return Err(self.client.status_error(&response, &self.path()));
        }

        // Success with no Range header: everything sent was stored.
        self.checker.update(&self.buffer[..l]);
        self.buffer.advance(l);
        self.offset += l as u64;
        if finalize {
            let resource: ObjectResource = response.json()?;
            debug!(path = %self.path(), bytes = self.offset, "resumable upload complete");
            Ok(Some(resource))
        } else {
            Ok(None)
        }
    }

    /// One-shot multipart upload for small payloads: a JSON metadata part
    /// and a content part in a single request.
    async fn simple_upload(&mut self) -> Result<ObjectResource, GcsError> {
        let metadata = serde_json::to_vec(&self.options.metadata_json(&self.key))?;
        let content_type = self
            .options
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let mut body = BytesMut::new();
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\nContent-Type: application/json; charset=UTF-8\n\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&metadata);
        body.extend_from_slice(
            format!("\n--{MULTIPART_BOUNDARY}\nContent-Type: {content_type}\n\n").as_bytes(),
        );
        body.extend_from_slice(&self.buffer);
        body.extend_from_slice(format!("\n--{MULTIPART_BOUNDARY}--").as_bytes());

        let mut url = self.client.upload_url(&self.bucket)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart");
        let request = ApiRequest::post(url)
            .header(
                http::header::CONTENT_TYPE,
                &format!("multipart/related; boundary=\"{MULTIPART_BOUNDARY}\""),
            )
            .body(body.freeze());
        let response = self.client.send_expect(request, &self.path()).await?;

        self.checker.update(&self.buffer);
        let len = self.buffer.len();
        self.buffer.advance(len);
        self.offset += len as u64;
        debug!(path = %self.path(), bytes = self.offset, "simple upload complete");
        Ok(response.json()?)
    }
}

/// Extract the last confirmed byte from `Range: bytes=0-{end}`.
fn parse_range_end(value: &str) -> Option<u64> {
    let (_, end) = value.trim().strip_prefix("bytes=")?.rsplit_once('-')?;
    end.parse().ok()
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("path", &self.path())
            .field("buffered", &self.buffer.len())
            .field("confirmed", &self.offset)
            .field("resumable", &self.session.is_some())
            .finish()
    }
}
