//! Thin JSON-API client: URL construction, status mapping, and the
//! single-request operations (metadata, listing, patch, rewrite, delete).
//! Multi-request protocols (uploads, batch deletes, cached reads) live in
//! their own modules and compose these primitives.

use std::sync::Arc;

use http::StatusCode;
use tracing::trace;
use transport::{ApiRequest, ApiResponse, Transport, TransportError};
use url::Url;

use crate::config::GcsConfig;
use crate::error::GcsError;
use crate::path::quote;
use crate::record::{BucketListResponse, BucketResource, ListResponse, ObjectResource};
use crate::DEFAULT_PAGE_SIZE;

/// Parameters for one listing page.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub page_token: Option<String>,
    pub max_results: Option<u32>,
    pub versions: bool,
    pub start_offset: Option<String>,
    pub end_offset: Option<String>,
}

#[derive(Clone)]
pub struct GcsClient {
    transport: Arc<dyn Transport>,
    config: Arc<GcsConfig>,
}

impl GcsClient {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<GcsConfig>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &GcsConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn parse_url(&self, suffix: &str) -> Result<Url, GcsError> {
        let url = format!("{}/{}", self.config.location(), suffix);
        Ok(Url::parse(&url).map_err(TransportError::from)?)
    }

    pub(crate) fn object_url(&self, bucket: &str, key: &str) -> Result<Url, GcsError> {
        self.parse_url(&format!("storage/v1/b/{bucket}/o/{}", quote(key)))
    }

    pub(crate) fn list_url(&self, bucket: &str) -> Result<Url, GcsError> {
        self.parse_url(&format!("storage/v1/b/{bucket}/o"))
    }

    pub(crate) fn buckets_url(&self) -> Result<Url, GcsError> {
        self.parse_url("storage/v1/b")
    }

    pub(crate) fn upload_url(&self, bucket: &str) -> Result<Url, GcsError> {
        self.parse_url(&format!("upload/storage/v1/b/{bucket}/o"))
    }

    pub(crate) fn batch_url(&self) -> Result<Url, GcsError> {
        self.parse_url("batch/storage/v1")
    }

    fn rewrite_url(
        &self,
        bucket: &str,
        key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<Url, GcsError> {
        self.parse_url(&format!(
            "storage/v1/b/{bucket}/o/{}/rewriteTo/b/{dest_bucket}/o/{}",
            quote(key),
            quote(dest_key),
        ))
    }

    /// Execute a request, applying the session deadline when the request
    /// carries none. Statuses come back unmapped.
    pub(crate) async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, GcsError> {
        if request.timeout.is_none() {
            if let Some(timeout) = self.config.request_timeout {
                request = request.timeout(timeout);
            }
        }
        trace!(method = %request.method, url = %request.url, "api request");
        Ok(self.transport.execute(request).await?)
    }

    /// Execute and require a success status, mapping failures onto the
    /// error taxonomy with `path` for context.
    pub(crate) async fn send_expect(
        &self,
        request: ApiRequest,
        path: &str,
    ) -> Result<ApiResponse, GcsError> {
        let response = self.send(request).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(self.status_error(&response, path))
        }
    }

    pub(crate) fn status_error(&self, response: &ApiResponse, path: &str) -> GcsError {
        let message = String::from_utf8_lossy(&response.body).into_owned();
        GcsError::from_status(response.status, path, message)
    }

    /// Fetch the full object resource, optionally pinned to a generation.
    pub(crate) async fn get_object_resource(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<&str>,
    ) -> Result<ObjectResource, GcsError> {
        let mut url = self.object_url(bucket, key)?;
        if let Some(generation) = generation {
            url.query_pairs_mut().append_pair("generation", generation);
        }
        let response = self
            .send_expect(ApiRequest::get(url), &format!("{bucket}/{key}"))
            .await?;
        Ok(response.json()?)
    }

    /// One page of an object listing.
    pub(crate) async fn list_page(
        &self,
        bucket: &str,
        query: &ListQuery,
    ) -> Result<ListResponse, GcsError> {
        let mut url = self.list_url(bucket)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(
                "maxResults",
                &query.max_results.unwrap_or(DEFAULT_PAGE_SIZE).to_string(),
            );
            if let Some(prefix) = &query.prefix {
                pairs.append_pair("prefix", prefix);
            }
            if let Some(delimiter) = &query.delimiter {
                pairs.append_pair("delimiter", delimiter);
            }
            if let Some(token) = &query.page_token {
                pairs.append_pair("pageToken", token);
            }
            if query.versions {
                pairs.append_pair("versions", "true");
            }
            if let Some(start) = &query.start_offset {
                pairs.append_pair("startOffset", start);
            }
            if let Some(end) = &query.end_offset {
                pairs.append_pair("endOffset", end);
            }
        }
        let response = self.send_expect(ApiRequest::get(url), bucket).await?;
        Ok(response.json()?)
    }

    /// All pages of an object listing, concatenated.
    pub(crate) async fn list_all(
        &self,
        bucket: &str,
        query: &ListQuery,
    ) -> Result<ListResponse, GcsError> {
        let mut merged = ListResponse::default();
        let mut query = query.clone();
        loop {
            let page = self.list_page(bucket, &query).await?;
            merged.items.extend(page.items);
            merged.prefixes.extend(page.prefixes);
            match page.next_page_token {
                Some(token) => query.page_token = Some(token),
                None => return Ok(merged),
            }
        }
    }

    /// Buckets owned by the configured project.
    pub(crate) async fn list_buckets(&self) -> Result<Vec<BucketResource>, GcsError> {
        let project = self
            .config
            .project
            .as_deref()
            .ok_or(GcsError::MissingProject)?;
        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.buckets_url()?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("project", project);
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }
            let response = self.send_expect(ApiRequest::get(url), "").await?;
            let page: BucketListResponse = response.json()?;
            buckets.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(buckets),
            }
        }
    }

    /// Download object content. `range` is a byte window with an
    /// inclusive end, or open-ended when the end is `None`. An
    /// unsatisfiable range comes back as an empty body rather than an
    /// error, since reading at EOF is not a failure; callers that care
    /// can still see the 416 status.
    pub(crate) async fn download(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<&str>,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<ApiResponse, GcsError> {
        let mut url = self.object_url(bucket, key)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("alt", "media");
            if let Some(generation) = generation {
                pairs.append_pair("generation", generation);
            }
        }
        let mut request = ApiRequest::get(url);
        match range {
            Some((start, Some(end))) => {
                request = request.header(http::header::RANGE, &format!("bytes={start}-{end}"));
            }
            Some((start, None)) => {
                request = request.header(http::header::RANGE, &format!("bytes={start}-"));
            }
            None => {}
        }
        let response = self.send(request).await?;
        if response.status.is_success() {
            return Ok(response);
        }
        if response.status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(ApiResponse {
                status: response.status,
                headers: response.headers,
                body: bytes::Bytes::new(),
            });
        }
        Err(self.status_error(&response, &format!("{bucket}/{key}")))
    }

    /// Patch mutable object metadata with a wire-format JSON document.
    pub(crate) async fn patch_object(
        &self,
        bucket: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<ObjectResource, GcsError> {
        let url = self.object_url(bucket, key)?;
        let request = ApiRequest::patch(url).json(payload)?;
        let response = self
            .send_expect(request, &format!("{bucket}/{key}"))
            .await?;
        Ok(response.json()?)
    }

    /// Server-side copy. `rewriteTo` may return partial progress with a
    /// token; loop until the resource materializes.
    pub(crate) async fn rewrite_object(
        &self,
        bucket: &str,
        key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<ObjectResource, GcsError> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RewriteResponse {
            done: bool,
            rewrite_token: Option<String>,
            resource: Option<ObjectResource>,
        }

        let mut token: Option<String> = None;
        loop {
            let mut url = self.rewrite_url(bucket, key, dest_bucket, dest_key)?;
            if let Some(token) = &token {
                url.query_pairs_mut().append_pair("rewriteToken", token);
            }
            let request = ApiRequest::post(url).json(&serde_json::json!({}))?;
            let response = self
                .send_expect(request, &format!("{bucket}/{key}"))
                .await?;
            let body: RewriteResponse = response.json()?;
            if body.done {
                return body.resource.ok_or_else(|| {
                    GcsError::UploadState("rewrite finished without a resource".into())
                });
            }
            token = body.rewrite_token;
            if token.is_none() {
                return Err(GcsError::UploadState(
                    "rewrite not done and no continuation token".into(),
                ));
            }
        }
    }

    /// Delete one object, optionally a specific generation.
    pub(crate) async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<&str>,
    ) -> Result<(), GcsError> {
        let mut url = self.object_url(bucket, key)?;
        if let Some(generation) = generation {
            url.query_pairs_mut().append_pair("generation", generation);
        }
        self.send_expect(ApiRequest::delete(url), &format!("{bucket}/{key}"))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for GcsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
