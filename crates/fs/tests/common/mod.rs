//! Shared test harness: an in-memory transport speaking enough of the
//! storage JSON API for the whole engine to run unmodified.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use cumulo_fs::{GcsConfig, GcsFs};

pub const ENDPOINT: &str = "http://mock.storage";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub generation: u64,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub metadata: HashMap<String, String>,
    pub fixed: HashMap<String, String>,
}

impl StoredObject {
    fn new(data: Vec<u8>, generation: u64) -> Self {
        Self {
            data,
            generation,
            content_type: "application/octet-stream".into(),
            content_encoding: None,
            metadata: HashMap::new(),
            fixed: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct UploadSession {
    bucket: String,
    key: String,
    metadata: serde_json::Value,
    received: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub requests: u64,
    pub lists: u64,
    pub downloads: u64,
    pub chunks: u64,
    pub batches: u64,
}

#[derive(Default)]
struct State {
    // bucket -> key -> generations, oldest first
    buckets: BTreeMap<String, BTreeMap<String, Vec<StoredObject>>>,
    sessions: HashMap<String, UploadSession>,
    // scripted statuses for DELETE of "{bucket}/{key}", consumed in order
    delete_scripts: HashMap<String, VecDeque<u16>>,
    // "{bucket}/{key}" entries whose metadata GET returns 403
    metadata_denied: Vec<String>,
    counters: Counters,
}

/// In-memory storage server behind the `Transport` seam.
pub struct MockTransport {
    state: Mutex<State>,
    next_id: AtomicU64,
    /// When set, resumable chunks are only accepted up to this many bytes
    /// per request, forcing offset renegotiation.
    pub max_accept_per_chunk: Mutex<Option<usize>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
            max_accept_per_chunk: Mutex::new(None),
        })
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Seed an object directly, bypassing the upload protocol.
    pub fn seed(&self, bucket: &str, key: &str, data: &[u8]) -> u64 {
        let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(StoredObject::new(data.to_vec(), generation));
        generation
    }

    /// Seed a compressed-at-rest object the server would transcode:
    /// `data` is what a client receives after decoding.
    pub fn seed_transcoded(&self, bucket: &str, key: &str, data: &[u8]) {
        let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut object = StoredObject::new(data.to_vec(), generation);
        object.content_encoding = Some("gzip".into());
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(object);
    }

    pub fn script_delete(&self, bucket: &str, key: &str, statuses: &[u16]) {
        self.state
            .lock()
            .unwrap()
            .delete_scripts
            .insert(format!("{bucket}/{key}"), statuses.iter().copied().collect());
    }

    pub fn deny_metadata(&self, bucket: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .metadata_denied
            .push(format!("{bucket}/{key}"));
    }

    pub fn shortfall_after(&self, bytes: usize) {
        *self.max_accept_per_chunk.lock().unwrap() = Some(bytes);
    }

    pub fn counters(&self) -> Counters {
        let state = self.state.lock().unwrap();
        Counters {
            requests: state.counters.requests,
            lists: state.counters.lists,
            downloads: state.counters.downloads,
            chunks: state.counters.chunks,
            batches: state.counters.batches,
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let state = self.state.lock().unwrap();
        state
            .buckets
            .get(bucket)?
            .get(key)?
            .last()
            .cloned()
    }

    pub fn has_object(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }
}

fn json_response(status: StatusCode, value: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from(serde_json::to_vec(&value).unwrap()),
    }
}

fn status_response(status: StatusCode) -> ApiResponse {
    ApiResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(v) = u8::from_str_radix(&segment[i + 1..i + 3], 16) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn resource_json(bucket: &str, key: &str, object: &StoredObject) -> serde_json::Value {
    let md5 = BASE64.encode(md5::compute(&object.data).0);
    let crc = BASE64.encode(crc32c::crc32c(&object.data).to_be_bytes());
    let mut value = serde_json::json!({
        "name": key,
        "bucket": bucket,
        "size": object.data.len().to_string(),
        "generation": object.generation.to_string(),
        "metageneration": "1",
        "updated": "2024-05-01T12:00:00.000Z",
        "timeCreated": "2024-05-01T12:00:00.000Z",
        "contentType": object.content_type,
        "md5Hash": md5,
        "crc32c": crc,
    });
    if let Some(encoding) = &object.content_encoding {
        value["contentEncoding"] = serde_json::json!(encoding);
    }
    if !object.metadata.is_empty() {
        value["metadata"] = serde_json::to_value(&object.metadata).unwrap();
    }
    for (k, v) in &object.fixed {
        value[k.as_str()] = serde_json::json!(v);
    }
    value
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.state.lock().unwrap().counters.requests += 1;
        let path = request.url.path().to_string();
        let query: HashMap<String, String> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // Resumable chunk traffic
        if let Some(id) = path.strip_prefix("/upload/session/") {
            return Ok(self.handle_chunk(id, &request));
        }
        if path == "/batch/storage/v1" && request.method == Method::POST {
            return Ok(self.handle_batch(&request));
        }
        if let Some(rest) = path.strip_prefix("/upload/storage/v1/b/") {
            let bucket = rest.trim_end_matches("/o").to_string();
            return Ok(self.handle_upload(&bucket, &query, &request));
        }
        if path == "/storage/v1/b" && request.method == Method::GET {
            return Ok(self.handle_bucket_list());
        }
        if let Some(rest) = path.strip_prefix("/storage/v1/b/") {
            let mut parts = rest.splitn(3, '/');
            let bucket = parts.next().unwrap_or_default().to_string();
            match (parts.next(), parts.next()) {
                (Some("o"), None) => return Ok(self.handle_list(&bucket, &query)),
                (Some("o"), Some(tail)) => {
                    if let Some((src, dst)) = tail.split_once("/rewriteTo/b/") {
                        let src_key = percent_decode(src);
                        let (dst_bucket, dst_key) = dst.split_once("/o/").unwrap_or((dst, ""));
                        return Ok(self.handle_rewrite(
                            &bucket,
                            &src_key,
                            dst_bucket,
                            &percent_decode(dst_key),
                        ));
                    }
                    let key = percent_decode(tail);
                    return Ok(self.handle_object(&bucket, &key, &query, &request));
                }
                _ => {}
            }
        }
        Ok(status_response(StatusCode::NOT_FOUND))
    }
}

impl MockTransport {
    fn handle_bucket_list(&self) -> ApiResponse {
        let state = self.state.lock().unwrap();
        let items: Vec<_> = state
            .buckets
            .keys()
            .map(|name| {
                serde_json::json!({
                    "name": name,
                    "timeCreated": "2024-05-01T12:00:00Z",
                    "updated": "2024-05-01T12:00:00Z",
                })
            })
            .collect();
        json_response(StatusCode::OK, serde_json::json!({ "items": items }))
    }

    fn handle_list(&self, bucket: &str, query: &HashMap<String, String>) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        state.counters.lists += 1;
        let Some(objects) = state.buckets.get(bucket) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        let prefix = query.get("prefix").cloned().unwrap_or_default();
        let delimiter = query.get("delimiter").cloned();
        let start = query.get("startOffset").cloned();
        let end = query.get("endOffset").cloned();
        let max: usize = query
            .get("maxResults")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);

        let mut items = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        for (key, generations) in objects {
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(start) = &start {
                if key < start {
                    continue;
                }
            }
            if let Some(end) = &end {
                if key >= end {
                    continue;
                }
            }
            let rest = &key[prefix.len()..];
            if let Some(delimiter) = &delimiter {
                if let Some(pos) = rest.find(delimiter.as_str()) {
                    let p = format!("{prefix}{}{delimiter}", &rest[..pos]);
                    if !prefixes.contains(&p) {
                        prefixes.push(p);
                    }
                    continue;
                }
            }
            if let Some(object) = generations.last() {
                items.push(resource_json(bucket, key, object));
            }
            if items.len() >= max {
                break;
            }
        }
        json_response(
            StatusCode::OK,
            serde_json::json!({ "items": items, "prefixes": prefixes }),
        )
    }

    fn handle_object(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
        request: &ApiRequest,
    ) -> ApiResponse {
        match request.method {
            Method::GET => self.handle_get(bucket, key, query, request),
            Method::DELETE => self.handle_delete(bucket, key, query),
            Method::PATCH => self.handle_patch(bucket, key, request),
            _ => status_response(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    fn find_object(
        state: &State,
        bucket: &str,
        key: &str,
        generation: Option<&String>,
    ) -> Option<StoredObject> {
        let generations = state.buckets.get(bucket)?.get(key)?;
        match generation {
            Some(g) => {
                let g: u64 = g.parse().ok()?;
                generations.iter().find(|o| o.generation == g).cloned()
            }
            None => generations.last().cloned(),
        }
    }

    fn handle_get(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
        request: &ApiRequest,
    ) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        let name = format!("{bucket}/{key}");
        if query.get("alt").map(String::as_str) != Some("media")
            && state.metadata_denied.contains(&name)
        {
            return status_response(StatusCode::FORBIDDEN);
        }
        let Some(object) = Self::find_object(&state, bucket, key, query.get("generation")) else {
            return status_response(StatusCode::NOT_FOUND);
        };

        if query.get("alt").map(String::as_str) == Some("media") {
            state.counters.downloads += 1;
            let mut headers = HeaderMap::new();
            let transcoded = object.content_encoding.is_some();
            let body: Vec<u8> = match request
                .headers
                .get(http::header::RANGE)
                .and_then(|v| v.to_str().ok())
            {
                Some(range) => {
                    let Some((start, end)) = parse_range(range) else {
                        return status_response(StatusCode::BAD_REQUEST);
                    };
                    if start >= object.data.len() as u64 {
                        return status_response(StatusCode::RANGE_NOT_SATISFIABLE);
                    }
                    let end = match end {
                        Some(end) => (end + 1).min(object.data.len() as u64),
                        None => object.data.len() as u64,
                    };
                    object.data[start as usize..end as usize].to_vec()
                }
                None => object.data.clone(),
            };
            if !transcoded {
                let hash = format!(
                    "crc32c={},md5={}",
                    BASE64.encode(crc32c::crc32c(&body).to_be_bytes()),
                    BASE64.encode(md5::compute(&body).0),
                );
                headers.insert("x-goog-hash", HeaderValue::from_str(&hash).unwrap());
                headers.insert(
                    http::header::CONTENT_LENGTH,
                    HeaderValue::from_str(&body.len().to_string()).unwrap(),
                );
            }
            return ApiResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from(body),
            };
        }
        json_response(StatusCode::OK, resource_json(bucket, key, &object))
    }

    fn handle_delete(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
    ) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        let name = format!("{bucket}/{key}");
        if let Some(script) = state.delete_scripts.get_mut(&name) {
            if let Some(status) = script.pop_front() {
                return status_response(StatusCode::from_u16(status).unwrap());
            }
        }
        let Some(objects) = state.buckets.get_mut(bucket) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        let generation = query.get("generation").and_then(|g| g.parse::<u64>().ok());
        match objects.get_mut(key) {
            Some(generations) => {
                match generation {
                    Some(g) => generations.retain(|o| o.generation != g),
                    None => generations.clear(),
                }
                if generations.is_empty() {
                    objects.remove(key);
                }
                status_response(StatusCode::NO_CONTENT)
            }
            None => status_response(StatusCode::NOT_FOUND),
        }
    }

    fn handle_patch(&self, bucket: &str, key: &str, request: &ApiRequest) -> ApiResponse {
        let payload: serde_json::Value = match request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
        {
            Some(v) => v,
            None => return status_response(StatusCode::BAD_REQUEST),
        };
        let mut state = self.state.lock().unwrap();
        let Some(object) = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.get_mut(key))
            .and_then(|g| g.last_mut())
        else {
            return status_response(StatusCode::NOT_FOUND);
        };
        if let Some(metadata) = payload.get("metadata").and_then(|m| m.as_object()) {
            object.metadata = metadata
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect();
        }
        for fixed in [
            "contentEncoding",
            "cacheControl",
            "contentDisposition",
            "contentLanguage",
            "customTime",
        ] {
            if let Some(value) = payload.get(fixed).and_then(|v| v.as_str()) {
                object.fixed.insert(fixed.to_string(), value.to_string());
            }
        }
        let object = object.clone();
        json_response(StatusCode::OK, resource_json(bucket, key, &object))
    }

    fn handle_rewrite(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> ApiResponse {
        let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let Some(mut object) = Self::find_object(&state, src_bucket, src_key, None) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        object.generation = generation;
        let resource = resource_json(dst_bucket, dst_key, &object);
        state
            .buckets
            .entry(dst_bucket.to_string())
            .or_default()
            .entry(dst_key.to_string())
            .or_default()
            .push(object);
        json_response(
            StatusCode::OK,
            serde_json::json!({ "done": true, "resource": resource }),
        )
    }

    fn handle_upload(
        &self,
        bucket: &str,
        query: &HashMap<String, String>,
        request: &ApiRequest,
    ) -> ApiResponse {
        match query.get("uploadType").map(String::as_str) {
            Some("multipart") => self.handle_multipart(bucket, request),
            Some("resumable") => self.handle_initiate(bucket, request),
            _ => status_response(StatusCode::BAD_REQUEST),
        }
    }

    fn handle_multipart(&self, bucket: &str, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or_default();
        let text = String::from_utf8_lossy(&body);
        // Parts: metadata JSON, then raw content. Boundary is ==0==.
        let mut parts = text.split("--==0==");
        let _preamble = parts.next();
        let meta_part = parts.next().unwrap_or_default();
        let metadata: serde_json::Value = meta_part
            .split_once("\n\n")
            .and_then(|(_, body)| serde_json::from_str(body.trim()).ok())
            .unwrap_or_default();
        let content_part = parts.next().unwrap_or_default();
        let content = content_part
            .split_once("\n\n")
            .map(|(_, body)| body.strip_suffix('\n').unwrap_or(body))
            .unwrap_or_default();

        let key = metadata
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        if key.is_empty() {
            return status_response(StatusCode::BAD_REQUEST);
        }
        self.store_object(bucket, &key, content.as_bytes().to_vec(), &metadata)
    }

    fn handle_initiate(&self, bucket: &str, request: &ApiRequest) -> ApiResponse {
        let metadata: serde_json::Value = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or_default();
        let key = metadata
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        if key.is_empty() {
            return status_response(StatusCode::BAD_REQUEST);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.state.lock().unwrap().sessions.insert(
            id.clone(),
            UploadSession {
                bucket: bucket.to_string(),
                key,
                metadata,
                received: Vec::new(),
            },
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::LOCATION,
            HeaderValue::from_str(&format!("{ENDPOINT}/upload/session/{id}")).unwrap(),
        );
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        }
    }

    fn handle_chunk(&self, id: &str, request: &ApiRequest) -> ApiResponse {
        if request.method == Method::DELETE {
            self.state.lock().unwrap().sessions.remove(id);
            return status_response(StatusCode::NO_CONTENT);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.counters.chunks += 1;
        }
        let content_range = request
            .headers
            .get(http::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = request.body.clone().unwrap_or_default();

        let max_accept = *self.max_accept_per_chunk.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(id) else {
            return status_response(StatusCode::NOT_FOUND);
        };

        let (declared_offset, total) = match parse_content_range(&content_range) {
            Some(parsed) => parsed,
            None => return status_response(StatusCode::BAD_REQUEST),
        };
        // A client must never declare an offset other than what the server
        // has confirmed: that would re-send accepted bytes.
        assert_eq!(
            declared_offset as usize,
            session.received.len(),
            "chunk offset disagrees with session state"
        );

        let accept = match max_accept {
            Some(limit) => body.len().min(limit),
            None => body.len(),
        };
        session.received.extend_from_slice(&body[..accept]);

        let finalized =
            total.is_some() && Some(session.received.len() as u64) == total && accept == body.len();
        if !finalized {
            let mut headers = HeaderMap::new();
            if !session.received.is_empty() {
                headers.insert(
                    http::header::RANGE,
                    HeaderValue::from_str(&format!("bytes=0-{}", session.received.len() - 1))
                        .unwrap(),
                );
            } else {
                // Nothing held yet; still incomplete.
                return status_response(StatusCode::PERMANENT_REDIRECT);
            }
            return ApiResponse {
                status: StatusCode::PERMANENT_REDIRECT,
                headers,
                body: Bytes::new(),
            };
        }

        let session = state.sessions.remove(id).unwrap();
        drop(state);
        self.store_object(
            &session.bucket,
            &session.key,
            session.received,
            &session.metadata,
        )
    }

    fn store_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: &serde_json::Value,
    ) -> ApiResponse {
        let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut object = StoredObject::new(data, generation);
        if let Some(content_type) = metadata.get("contentType").and_then(|v| v.as_str()) {
            object.content_type = content_type.to_string();
        }
        if let Some(user) = metadata.get("metadata").and_then(|m| m.as_object()) {
            object.metadata = user
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect();
        }
        for fixed in ["cacheControl", "contentDisposition", "contentLanguage", "customTime"] {
            if let Some(value) = metadata.get(fixed).and_then(|v| v.as_str()) {
                object.fixed.insert(fixed.to_string(), value.to_string());
            }
        }
        let resource = resource_json(bucket, key, &object);
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(object);
        json_response(StatusCode::OK, resource)
    }

    fn handle_batch(&self, request: &ApiRequest) -> ApiResponse {
        {
            let mut state = self.state.lock().unwrap();
            state.counters.batches += 1;
        }
        let body = request.body.clone().unwrap_or_default();
        let text = String::from_utf8_lossy(&body).into_owned();

        let mut parts_out = String::new();
        let mut index = 0;
        for line in text.lines() {
            let Some(rest) = line.strip_prefix("DELETE /storage/v1/b/") else {
                continue;
            };
            let target = rest.trim_end_matches(" HTTP/1.1");
            let (target, query_str) = match target.split_once('?') {
                Some((path, query)) => (path, query),
                None => (target, ""),
            };
            let (bucket, encoded_key) = target.split_once("/o/").unwrap_or((target, ""));
            let key = percent_decode(encoded_key);
            let query: HashMap<String, String> = query_str
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let response = self.handle_delete(bucket, &key, &query);
            let status = response.status;
            let error_body = if status.is_success() {
                String::new()
            } else {
                format!(
                    "Content-Type: application/json\n\n{{\"error\": {{\"code\": {}, \"message\": \"{} on {}/{}\"}}}}\n",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("error"),
                    bucket,
                    key,
                )
            };
            parts_out.push_str(&format!(
                "--BATCHRESP\nContent-Type: application/http\nContent-ID: <response-b+{index}>\n\nHTTP/1.1 {} X\n{error_body}\n",
                status.as_u16(),
            ));
            index += 1;
        }
        parts_out.push_str("--BATCHRESP--");

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/mixed; boundary=BATCHRESP"),
        );
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(parts_out.into_bytes()),
        }
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start.parse().ok()?, end))
}

/// Parse `Content-Range: bytes {off}-{end}/{total|*}` or `bytes */{total}`.
/// Returns the declared offset and the total when final.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.strip_prefix("bytes ")?;
    let (span, total) = rest.rsplit_once('/')?;
    let total = if total == "*" {
        None
    } else {
        Some(total.parse().ok()?)
    };
    if span == "*" {
        // Empty finalizer declares only the total.
        return total.map(|t| (t, Some(t)));
    }
    let (start, _end) = span.split_once('-')?;
    Some((start.parse().ok()?, total))
}

/// Fresh filesystem over a fresh mock with one bucket.
pub fn setup() -> (GcsFs, Arc<MockTransport>) {
    setup_with(GcsConfig::default())
}

pub fn setup_with(mut config: GcsConfig) -> (GcsFs, Arc<MockTransport>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let transport = MockTransport::new();
    transport.create_bucket("bkt");
    config.endpoint = Some(ENDPOINT.to_string());
    if config.project.is_none() {
        config.project = Some("test-project".into());
    }
    let fs = GcsFs::with_transport(transport.clone(), config);
    (fs, transport)
}
