//! Wire-level object resources and their normalized in-engine form.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subset of the GCS object resource consumed by the engine.
///
/// Integer fields arrive as JSON strings, matching the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectResource {
    pub name: String,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metageneration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc32c: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ObjectResource {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Listing response: concrete objects plus delimiter-derived prefixes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResponse {
    pub items: Vec<ObjectResource>,
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketListResponse {
    pub items: Vec<BucketResource>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketResource {
    pub name: String,
    pub time_created: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Normalized object information, the unit stored in the listing cache.
///
/// `name` is always the canonical `{bucket}/{key}` form. `size` is `None`
/// for transcoded (compressed-at-rest) objects, where the reported size
/// does not reflect the decoded length.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub mtime: Option<DateTime<Utc>>,
    pub ctime: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ObjectRecord {
    pub fn from_resource(bucket: &str, resource: &ObjectResource) -> Self {
        let key = resource.name.clone();
        // Compressed-at-rest content is served decoded; the stored size
        // is meaningless for reads.
        let size = if resource.content_encoding.as_deref() == Some("gzip") {
            None
        } else {
            Some(resource.size_bytes().unwrap_or(0))
        };
        Self {
            bucket: bucket.to_string(),
            name: format!("{bucket}/{key}"),
            key,
            kind: EntryKind::File,
            size,
            generation: resource.generation.clone(),
            metageneration: resource.metageneration.clone(),
            mtime: resource.updated.as_deref().and_then(parse_timestamp),
            ctime: resource.time_created.as_deref().and_then(parse_timestamp),
            content_type: resource.content_type.clone(),
            content_encoding: resource.content_encoding.clone(),
            metadata: resource.metadata.clone().unwrap_or_default(),
        }
    }

    /// A directory that exists only as a common key prefix.
    pub fn implied_directory(name: &str) -> Self {
        let name = name.trim_end_matches('/').to_string();
        let (bucket, key) = name
            .split_once('/')
            .map(|(b, k)| (b.to_string(), k.to_string()))
            .unwrap_or_else(|| (name.clone(), String::new()));
        Self {
            bucket,
            key,
            name,
            kind: EntryKind::Directory,
            size: Some(0),
            generation: None,
            metageneration: None,
            mtime: None,
            ctime: None,
            content_type: None,
            content_encoding: None,
            metadata: HashMap::new(),
        }
    }

    /// Record for a bucket in the root listing.
    pub fn bucket_directory(bucket: &str) -> Self {
        let mut record = Self::implied_directory(bucket);
        record.bucket = bucket.to_string();
        record.key = String::new();
        record
    }

    pub fn is_transcoded(&self) -> bool {
        self.content_encoding.as_deref() == Some("gzip")
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Parse an RFC3339 'Z'-suffixed timestamp, normalizing sub-second
/// precision to 6 digits.
pub(crate) fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.strip_suffix('Z')?;
    let normalized = match ts.split_once('.') {
        Some((base, frac)) => format!("{base}.{frac:0<6}"),
        None => format!("{ts}.000000"),
    };
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Mutable fixed-key metadata, snake_case here and camelCase on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedKeyMetadata {
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub custom_time: Option<String>,
}

impl FixedKeyMetadata {
    pub fn from_resource(resource: &ObjectResource) -> Self {
        Self {
            content_encoding: resource.content_encoding.clone(),
            cache_control: resource.cache_control.clone(),
            content_disposition: resource.content_disposition.clone(),
            content_language: resource.content_language.clone(),
            custom_time: resource.custom_time.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the set fields into a wire-format JSON object.
    pub(crate) fn apply_to(&self, object: &mut serde_json::Map<String, serde_json::Value>) {
        let pairs = [
            ("contentEncoding", &self.content_encoding),
            ("cacheControl", &self.cache_control),
            ("contentDisposition", &self.content_disposition),
            ("contentLanguage", &self.content_language),
            ("customTime", &self.custom_time),
        ];
        for (wire_key, value) in pairs {
            if let Some(value) = value {
                object.insert(wire_key.to_string(), serde_json::Value::String(value.clone()));
            }
        }
    }
}
