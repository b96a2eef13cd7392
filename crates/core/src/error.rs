//! Error types for stratus
//!
//! A single error enum covers every failure the transfer engine can surface.
//! Retry decisions are made from [`ErrorKind`], never from message text.

use thiserror::Error;

/// Result type alias using the stratus error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transfer engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected by the auth service
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A storage request was refused with 401/403 using a cached token
    #[error("Authentication expired for {path} (status {status})")]
    AuthExpired { status: u16, path: String },

    /// Connection reset, refused, or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// 5xx response from the storage service
    #[error("Server error {status} for {path}")]
    Server { status: u16, path: String },

    /// 4xx response other than auth expiry or not-found
    #[error("Client error {status} for {path}")]
    Client { status: u16, path: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Reassembled segment disagrees with its static manifest entry
    #[error("Segment integrity check failed for {path}: {detail}")]
    SegmentIntegrity { path: String, detail: String },

    /// Retry ceiling reached; wraps the last classified failure
    #[error("Gave up after {attempts} attempts: {last}")]
    CapacityExhausted { attempts: u32, last: Box<Error> },

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

/// Coarse classification used by the retry policy and for exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    AuthExpired,
    TransientNetwork,
    Server,
    Client,
    NotFound,
    SegmentIntegrity,
    CapacityExhausted,
    Usage,
    Local,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(_) => ErrorKind::Auth,
            Error::AuthExpired { .. } => ErrorKind::AuthExpired,
            Error::Network(_) => ErrorKind::TransientNetwork,
            Error::Server { .. } => ErrorKind::Server,
            Error::Client { .. } => ErrorKind::Client,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SegmentIntegrity { .. } => ErrorKind::SegmentIntegrity,
            Error::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            Error::AliasNotFound(_)
            | Error::InvalidPath(_)
            | Error::Config(_)
            | Error::UnsupportedFeature(_) => ErrorKind::Usage,
            Error::Io(e) if is_transient_io(e) => ErrorKind::TransientNetwork,
            Error::Io(_) | Error::Json(_) | Error::General(_) => ErrorKind::Local,
        }
    }

    /// Whether the retry policy may repeat the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::Server | ErrorKind::AuthExpired
        )
    }

    /// The innermost error, looking through retry exhaustion
    pub fn root(&self) -> &Error {
        match self {
            Error::CapacityExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}
