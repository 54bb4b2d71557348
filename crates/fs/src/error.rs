use http::StatusCode;
use transport::TransportError;

/// Engine-level error taxonomy.
///
/// Variants carry machine-checkable kinds: permission denial triggers the
/// documented list fallback, consistency mismatches are fatal and never
/// retried, generation ambiguity is a caller bug.
#[derive(Debug, thiserror::Error)]
pub enum GcsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Locally computed digest or size disagrees with the server.
    #[error("consistency mismatch ({mode}): expected {expected}, got {actual}")]
    ConsistencyMismatch {
        mode: &'static str,
        expected: String,
        actual: String,
    },
    /// Two distinct generations supplied for one operation.
    #[error("conflicting generations: {0} vs {1}")]
    GenerationConflict(String, String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Bucket-level listing needs a project to scope the query.
    #[error("no project configured for bucket listing")]
    MissingProject,
    /// The resumable upload session is not in a state that allows the
    /// requested transition.
    #[error("upload state error: {0}")]
    UploadState(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
}

impl GcsError {
    /// Map a non-success HTTP status onto the taxonomy, attaching the
    /// path for context.
    pub(crate) fn from_status(status: StatusCode, path: &str, message: String) -> Self {
        match status.as_u16() {
            404 => GcsError::NotFound(path.to_string()),
            401 | 403 => GcsError::PermissionDenied(path.to_string()),
            _ => GcsError::Transport(TransportError::Http { status, message }),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GcsError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GcsError::Transport(TransportError::Timeout(_)))
    }
}
