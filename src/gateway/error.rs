// Nuclino MCP — Gateway error types

use thiserror::Error;

/// Why an inbound request was refused before reaching a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Session creation without a credential. The session is never created.
    #[error("Bad Request: Nuclino API key is required")]
    MissingCredential,

    /// No session id on a request that is not an initialize request.
    #[error("Bad Request: No valid session ID provided")]
    MissingSessionId,

    /// The id does not name a live session.
    #[error("Bad Request: No valid session ID provided")]
    UnknownSession(String),
}

impl Rejection {
    /// Configuration rejections come from missing setup; everything else
    /// is a protocol rejection.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Rejection::MissingCredential)
    }
}

/// Failures of a session's stream endpoint.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("session stream is closed")]
    Closed,

    #[error("request frame has no id")]
    MissingId,

    #[error("a request with id {0} is already in flight")]
    DuplicateRequestId(String),

    #[error("stream IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures that stop a transport.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
