//! Client error types

use thiserror::Error;

/// Client error type.
///
/// Per-relay failures are stored in outcomes, so the type is `Clone` and
/// comparable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// WebSocket handshake did not finish within the connect timeout
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// Relay refused or failed the WebSocket handshake
    #[error("Connection refused: {0}")]
    ConnectRefused(String),

    /// No correlated response (OK, EVENT, EOSE, CLOSED) within the request timeout
    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    /// Relay answered the AUTH event with OK(false)
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Relay demands authentication and the client cannot (or may no longer) provide it
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Relay rejected the request for a non-auth reason
    #[error("Rejected by relay: {0}")]
    Rejected(String),

    /// Connection closed while the request was pending
    #[error("Request cancelled: connection closed")]
    Cancelled,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Publish called with an empty relay list
    #[error("No relays to publish to")]
    NoRelays,

    /// A second awaiter was registered for a key that already has one
    #[error("Duplicate awaiter for {0}")]
    DuplicateAwaiter(String),

    /// Signer failed to produce an event
    #[error("Signing error: {0}")]
    Signing(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// The relay-supplied reason, for errors that carry one.
    pub fn relay_message(&self) -> Option<&str> {
        match self {
            ClientError::Rejected(msg)
            | ClientError::AuthRejected(msg)
            | ClientError::AuthRequired(msg) => Some(msg),
            _ => None,
        }
    }

    /// Whether the failure was a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout(_) | ClientError::RequestTimeout(_)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<nostr_core::SignerError> for ClientError {
    fn from(err: nostr_core::SignerError) -> Self {
        ClientError::Signing(err.to_string())
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
