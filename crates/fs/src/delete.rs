//! Bulk deletion over the batch endpoint.
//!
//! Deletes go out as multipart/mixed batches of individual DELETE
//! sub-requests, each tagged with a Content-ID so per-object outcomes can
//! be recovered from the multipart response. Sub-requests that fail with
//! a retryable status are re-batched in later rounds with backoff; a 404
//! means the object was already gone and is benign unless nothing at all
//! was deleted.

use futures::stream::{self, StreamExt, TryStreamExt};
use http::StatusCode;
use tracing::{debug, warn};
use transport::{backoff_delay, is_retryable_status, ApiRequest};

use crate::client::GcsClient;
use crate::error::GcsError;
use crate::path::quote;

const BATCH_BOUNDARY: &str = "===============7330845974216740156==";
const MAX_ROUNDS: u32 = 5;

/// One object to delete: bucket, key, optional pinned generation.
pub(crate) type DeleteTarget = (String, String, Option<String>);

/// Per-path result of a completed bulk delete.
#[derive(Debug, Default)]
pub(crate) struct DeleteReport {
    pub deleted: Vec<String>,
    pub missing: Vec<String>,
}

/// Delete targets in batches, retrying transient failures.
///
/// Errors only on a non-retryable failure, on retryable failures that
/// survive every round, or when no object was deleted at all.
pub(crate) async fn bulk_delete(
    client: &GcsClient,
    paths: &[DeleteTarget],
) -> Result<DeleteReport, GcsError> {
    let mut report = DeleteReport::default();
    if paths.is_empty() {
        return Ok(report);
    }
    let batch_size = client.config().effective_batch_size();

    let mut pending = paths.to_vec();
    let mut last_failure: Option<(String, StatusCode, String)> = None;

    for round in 1..=MAX_ROUNDS {
        if round > 1 {
            tokio::time::sleep(backoff_delay(round - 1)).await;
        }
        let mut retry = Vec::new();
        last_failure = None;

        // Batches within a round go out concurrently, bounded by the
        // session's bulk concurrency. `buffered` keeps input order.
        let batches: Vec<&[DeleteTarget]> = pending.chunks(batch_size).collect();
        let outcomes: Vec<Vec<Option<(StatusCode, String)>>> =
            stream::iter(batches.iter().map(|batch| send_batch(client, batch)))
                .buffered(client.config().bulk_concurrency.max(1))
                .try_collect()
                .await?;

        for (batch, parts) in batches.into_iter().zip(outcomes) {
            for (target, part) in batch.iter().zip(parts) {
                let (bucket, key, _) = target;
                let name = format!("{bucket}/{key}");
                match part {
                    Some((status, _)) if status.is_success() => report.deleted.push(name),
                    Some((status, _)) if status == StatusCode::NOT_FOUND => {
                        report.missing.push(name)
                    }
                    Some((status, body)) if is_retryable_status(status) => {
                        retry.push(target.clone());
                        last_failure = Some((name, status, error_message(&body)));
                    }
                    Some((status, body)) => {
                        return Err(GcsError::from_status(status, &name, error_message(&body)));
                    }
                    // Response part missing for this ID; treat as transient.
                    None => {
                        retry.push(target.clone());
                        last_failure =
                            Some((name, StatusCode::INTERNAL_SERVER_ERROR, String::new()));
                    }
                }
            }
        }

        if retry.is_empty() {
            pending = retry;
            break;
        }
        warn!(
            remaining = retry.len(),
            round, "retrying failed deletes"
        );
        pending = retry;
    }

    if !pending.is_empty() {
        let (name, status, message) =
            last_failure.unwrap_or(("".into(), StatusCode::INTERNAL_SERVER_ERROR, String::new()));
        return Err(GcsError::from_status(status, &name, message));
    }
    if report.deleted.is_empty() && !report.missing.is_empty() {
        return Err(GcsError::NotFound(report.missing[0].clone()));
    }
    debug!(
        deleted = report.deleted.len(),
        missing = report.missing.len(),
        "bulk delete complete"
    );
    Ok(report)
}

/// Send one batch and return `(status, body)` for each sub-request, in
/// input order. A missing slot means the response had no part for that
/// ID.
async fn send_batch(
    client: &GcsClient,
    batch: &[DeleteTarget],
) -> Result<Vec<Option<(StatusCode, String)>>, GcsError> {
    let mut body = String::new();
    for (i, (bucket, key, generation)) in batch.iter().enumerate() {
        let pin = generation
            .as_deref()
            .map(|g| format!("?generation={g}"))
            .unwrap_or_default();
        body.push_str(&format!(
            "--{BATCH_BOUNDARY}\n\
             Content-Type: application/http\n\
             Content-Transfer-Encoding: binary\n\
             Content-ID: <b+{i}>\n\n\
             DELETE /storage/v1/b/{bucket}/o/{}{pin} HTTP/1.1\n\
             Content-Type: application/json\n\
             accept: application/json\n\
             content-length: 0\n\n",
            quote(key),
        ));
    }
    body.push_str(&format!("--{BATCH_BOUNDARY}--"));

    let request = ApiRequest::post(client.batch_url()?)
        .header(
            http::header::CONTENT_TYPE,
            &format!("multipart/mixed; boundary=\"{BATCH_BOUNDARY}\""),
        )
        .body(body.into_bytes());
    let response = client.send_expect(request, "batch").await?;

    let boundary = response
        .header(http::header::CONTENT_TYPE)
        .and_then(multipart_boundary)
        .unwrap_or_else(|| BATCH_BOUNDARY.to_string());
    let text = String::from_utf8_lossy(&response.body).into_owned();
    Ok(parse_batch_parts(&text, &boundary, batch.len()))
}

/// The human-readable message from a nested JSON error body, or the raw
/// text when the body is not the usual `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Pull `boundary=` out of a multipart content type, unquoting if needed.
fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Map each response part back to its sub-request via `Content-ID`
/// (`<response-...+{i}>`) and extract the embedded HTTP status line plus
/// the body that follows its headers.
fn parse_batch_parts(body: &str, boundary: &str, n: usize) -> Vec<Option<(StatusCode, String)>> {
    let mut parts = vec![None; n];
    let delimiter = format!("--{boundary}");
    for part in body.split(delimiter.as_str()) {
        let Some(index) = part
            .lines()
            .find_map(|line| {
                line.strip_prefix("Content-ID:")
                    .map(str::trim)
                    .and_then(|id| id.trim_end_matches('>').rsplit_once('+'))
                    .map(|(_, idx)| idx.to_string())
            })
            .and_then(|idx| idx.parse::<usize>().ok())
        else {
            continue;
        };
        let Some(embedded) = part.find("HTTP/1.").map(|at| &part[at..]) else {
            continue;
        };
        let status = embedded
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok());
        let Some(status) = status else { continue };
        let payload = embedded
            .split_once("\r\n\r\n")
            .or_else(|| embedded.split_once("\n\n"))
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        if index < n {
            parts[index] = Some((status, payload.to_string()));
        }
    }
    parts
}
