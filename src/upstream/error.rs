// Nuclino MCP — Upstream error types
//
// Every failure carries its own retry classification so the retry
// handler never has to inspect message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The API answered with a non-2xx status.
    #[error("Nuclino API request failed with status {status}: {reason}")]
    Status { status: u16, reason: String },

    /// The request never produced a response (timeout, refused connection, reset).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The response arrived but did not have the expected shape.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// The base URL cannot carry path segments.
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),

    /// An operation that gave up, either after exhausting retries or on
    /// the first non-retryable failure.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Whether the failure is transient: an upstream rate-limit rejection
    /// or a network-level condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => *status == 429,
            UpstreamError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UpstreamError::MalformedResponse(_) => false,
            UpstreamError::InvalidUrl(_) => false,
            UpstreamError::Failed { .. } => false,
        }
    }

    /// The innermost cause, looking through `Failed` wrappers.
    pub fn root_cause(&self) -> &UpstreamError {
        match self {
            UpstreamError::Failed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Classify a transport error from reqwest.
    ///
    /// Body decoding failures are reported as malformed responses; all
    /// other reqwest errors are network failures.
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            UpstreamError::MalformedResponse(e.to_string())
        } else {
            UpstreamError::Network(e)
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
