//! Path parsing for `gs://bucket/key` style paths. Pure functions, no I/O.

use crate::error::GcsError;

/// Strip the URL scheme and leading slashes from a path.
pub(crate) fn strip_protocol(path: &str) -> &str {
    let path = path
        .strip_prefix("gs://")
        .or_else(|| path.strip_prefix("gcs://"))
        .unwrap_or(path);
    path.trim_start_matches('/')
}

/// Split a path into `(bucket, key, generation)`.
///
/// A generation may ride along either as a URL fragment (`#123`) or a
/// `generation` query parameter; the fragment wins. A value that does not
/// look like an integer is assumed to be part of the object key, since
/// `#` and `?` are legal key characters.
pub fn split_path(path: &str, version_aware: bool) -> (String, String, Option<String>) {
    let path = strip_protocol(path);
    let Some((bucket, keypart)) = path.split_once('/') else {
        return (path.to_string(), String::new(), None);
    };

    if !version_aware {
        return (bucket.to_string(), keypart.to_string(), None);
    }

    let (rest, fragment) = match keypart.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (keypart, None),
    };
    let (bare_key, query) = match rest.split_once('?') {
        Some((key, query)) => (key, Some(query)),
        None => (rest, None),
    };

    let generation = match fragment {
        Some(f) if !f.is_empty() => Some(f.to_string()),
        _ => query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "generation")
                .map(|(_, v)| v.into_owned())
        }),
    };

    match generation {
        // Only an integer-looking value is a plausible generation.
        Some(g) if g.parse::<i64>().is_ok() => (bucket.to_string(), bare_key.to_string(), Some(g)),
        _ => (bucket.to_string(), keypart.to_string(), None),
    }
}

/// Reduce generation values from multiple sources to at most one.
pub fn coalesce_generation(
    a: Option<&str>,
    b: Option<&str>,
) -> Result<Option<String>, GcsError> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => {
            Err(GcsError::GenerationConflict(a.to_string(), b.to_string()))
        }
        (Some(a), _) => Ok(Some(a.to_string())),
        (None, b) => Ok(b.map(str::to_string)),
    }
}

/// Canonical `{bucket}/{key}` form. A directory named with or without a
/// trailing slash is the same directory, so trailing slashes are dropped.
pub fn norm_path(path: &str) -> String {
    let (bucket, key, _) = split_path(path, false);
    let key = key.trim_end_matches('/');
    if key.is_empty() {
        bucket
    } else {
        format!("{bucket}/{key}")
    }
}

/// Containing directory of a path, with `""` as the root above buckets.
pub fn parent(path: &str) -> String {
    let path = strip_protocol(path).trim_end_matches('/');
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Percent-encode a key as a single URL path segment. Everything outside
/// the unreserved set is escaped, including `/`.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
