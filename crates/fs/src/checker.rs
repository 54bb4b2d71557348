//! End-to-end transfer integrity checking.
//!
//! A checker accumulates every byte sent or received during one transfer
//! and validates the result against what the server reports: the JSON
//! completion body for uploads, response headers for downloads. A
//! mismatch is fatal for the transfer — retrying cannot fix wrong
//! content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::HeaderMap;

use crate::error::GcsError;
use crate::record::ObjectResource;

/// Which integrity check to apply to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// No checking; always valid.
    None,
    /// Byte-count comparison only.
    Size,
    /// Full MD5 digest, base64-compared against `md5Hash`.
    #[default]
    Md5,
    /// CRC32C (Castagnoli), base64 of the big-endian checksum.
    Crc32c,
}

/// Rolling transfer state for one upload or download.
#[derive(Clone)]
pub enum ConsistencyChecker {
    None,
    Size { length: u64 },
    Md5 { context: md5::Context },
    Crc32c { state: u32 },
}

impl ConsistencyChecker {
    pub fn new(mode: Consistency) -> Self {
        match mode {
            Consistency::None => Self::None,
            Consistency::Size => Self::Size { length: 0 },
            Consistency::Md5 => Self::Md5 {
                context: md5::Context::new(),
            },
            Consistency::Crc32c => Self::Crc32c { state: 0 },
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::None => {}
            Self::Size { length } => *length += data.len() as u64,
            Self::Md5 { context } => context.consume(data),
            Self::Crc32c { state } => *state = crc32c::crc32c_append(*state, data),
        }
    }

    fn md5_base64(context: &md5::Context) -> String {
        let digest = context.clone().compute();
        BASE64.encode(digest.0)
    }

    fn crc32c_base64(state: u32) -> String {
        BASE64.encode(state.to_be_bytes())
    }

    /// Validate an upload against the object resource the server returned.
    pub fn validate_json(&self, resource: &ObjectResource) -> Result<(), GcsError> {
        match self {
            Self::None => Ok(()),
            Self::Size { length } => match resource.size_bytes() {
                Some(server) if server != *length => Err(mismatch(
                    "size",
                    length.to_string(),
                    server.to_string(),
                )),
                _ => Ok(()),
            },
            Self::Md5 { context } => {
                let local = Self::md5_base64(context);
                match &resource.md5_hash {
                    Some(server) if *server != local => {
                        Err(mismatch("md5", local, server.clone()))
                    }
                    _ => Ok(()),
                }
            }
            Self::Crc32c { state } => {
                let local = Self::crc32c_base64(*state);
                match &resource.crc32c {
                    Some(server) if *server != local => {
                        Err(mismatch("crc32c", local, server.clone()))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Validate a whole-object download against response headers
    /// (`x-goog-hash` digests, `content-length` for size).
    pub fn validate_headers(&self, headers: &HeaderMap) -> Result<(), GcsError> {
        match self {
            Self::None => Ok(()),
            Self::Size { length } => {
                let server = headers
                    .get(http::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                match server {
                    Some(server) if server != *length => Err(mismatch(
                        "size",
                        length.to_string(),
                        server.to_string(),
                    )),
                    _ => Ok(()),
                }
            }
            Self::Md5 { context } => {
                let local = Self::md5_base64(context);
                match goog_hash(headers, "md5") {
                    Some(server) if server != local => Err(mismatch("md5", local, server)),
                    _ => Ok(()),
                }
            }
            Self::Crc32c { state } => {
                let local = Self::crc32c_base64(*state);
                match goog_hash(headers, "crc32c") {
                    Some(server) if server != local => Err(mismatch("crc32c", local, server)),
                    _ => Ok(()),
                }
            }
        }
    }
}

impl std::fmt::Debug for ConsistencyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            Self::None => "none",
            Self::Size { .. } => "size",
            Self::Md5 { .. } => "md5",
            Self::Crc32c { .. } => "crc32c",
        };
        f.debug_tuple("ConsistencyChecker").field(&mode).finish()
    }
}

/// Extract one digest from `x-goog-hash`, which may carry several
/// comma-separated `name=base64` entries across repeated headers.
fn goog_hash(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all("x-goog-hash") {
        let value = value.to_str().ok()?;
        for entry in value.split(',') {
            if let Some(rest) = entry.trim().strip_prefix(name) {
                if let Some(digest) = rest.strip_prefix('=') {
                    return Some(digest.to_string());
                }
            }
        }
    }
    None
}

fn mismatch(mode: &'static str, expected: String, actual: String) -> GcsError {
    GcsError::ConsistencyMismatch {
        mode,
        expected,
        actual,
    }
}
