//! Error types for issuing streaming requests

use miette::Diagnostic;

/// Error returned while issuing a request, before any body is read
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum FetchError {
    /// HTTP transport error
    #[error("HTTP transport error: {0}")]
    Transport(
        #[from]
        #[diagnostic_source]
        TransportError,
    ),

    /// Request payload serialization failed
    #[error("{0}")]
    Encode(
        #[from]
        #[diagnostic_source]
        EncodeError,
    ),

    /// Server answered with an error status
    #[error("{0}")]
    Http(
        #[from]
        #[diagnostic_source]
        HttpError,
    ),
}

impl FetchError {
    /// The connection could not be established
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Connect(_)))
    }

    /// No response headers arrived within the configured deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout))
    }
}

/// Transport-level errors that occur before the response headers are in
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TransportError {
    /// Failed to establish connection to server
    #[error("Connection error: {0}")]
    #[diagnostic(
        code(streamfetch::transport::connect),
        help("check that the host is reachable and the port is open")
    )]
    Connect(String),

    /// Response headers did not arrive in time
    #[error("Request timeout")]
    #[diagnostic(
        code(streamfetch::transport::timeout),
        help("raise or unset `header_timeout` in the client config")
    )]
    Timeout,

    /// Request construction failed (malformed URL, headers, etc.)
    #[error("Invalid request: {0}")]
    #[diagnostic(code(streamfetch::transport::invalid_request))]
    InvalidRequest(String),

    /// Other transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(streamfetch::transport::other))]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Error type for encoding request payloads
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum EncodeError {
    /// Failed to serialize JSON body
    #[error("Failed to serialize JSON: {0}")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),
    /// Failed to serialize form body
    #[error("Failed to serialize form: {0}")]
    Form(
        #[from]
        #[source]
        serde_html_form::ser::Error,
    ),
    /// Other encoding error
    #[error("Encoding error: {0}")]
    Other(String),
}

/// HTTP error status (4xx/5xx) surfaced by `error_for_status`
#[derive(Debug, thiserror::Error, Diagnostic)]
pub struct HttpError {
    /// HTTP status code
    pub status: http::StatusCode,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}", self.status)
    }
}

/// Result type for issuing requests
pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() || e.is_request() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Other(Box::new(e))
        }
    }
}
