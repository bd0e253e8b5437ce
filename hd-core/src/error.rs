//! Global error types for the helpdesk client.
//!
//! All error categories across the workspace are unified into a single
//! `HdError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using HdError.
pub type HdResult<T> = Result<T, HdError>;

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum HdError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Network errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// Request or handshake timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport-level socket error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The realtime connection is not established.
    #[error("socket disconnected")]
    SocketDisconnected,

    /// The broker answered the authenticated handshake with an ERROR frame.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A malformed STOMP frame was received or produced.
    #[error("frame error: {0}")]
    Frame(String),

    /// Server returned an error response.
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// The server rejected the presented credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // -- Session errors --
    /// An access token could not be decoded.
    #[error("invalid token: {0}")]
    Token(String),

    /// No session is active.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Exchanging the refresh token failed; the session has been cleared.
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    /// Durable session storage failed.
    #[error("session storage error: {0}")]
    Storage(String),

    // -- Dispatch errors --
    /// An inbound payload could not be decoded.
    #[error("payload error on {topic}: {message}")]
    Payload {
        /// Topic the payload arrived on.
        topic: String,
        /// Decoder message.
        message: String,
    },

    /// A subscription handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HdError {
    /// Whether this error is a network blip rather than an authoritative
    /// rejection. Transient errors may be retried; the rest may not.
    pub fn is_transient(&self) -> bool {
        match self {
            HdError::Http(_)
            | HdError::Timeout(_)
            | HdError::Socket(_)
            | HdError::SocketDisconnected => true,
            HdError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this error means the credential itself was refused.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            HdError::Unauthorized(_) | HdError::HandshakeRejected(_) | HdError::Token(_)
        )
    }
}

impl From<serde_json::Error> for HdError {
    fn from(e: serde_json::Error) -> Self {
        HdError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for HdError {
    fn from(e: toml::de::Error) -> Self {
        HdError::Config(e.to_string())
    }
}
