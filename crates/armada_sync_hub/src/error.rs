//! Error types for the dispatch hub.

use thiserror::Error;
use uuid::Uuid;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Errors that can occur in the dispatch hub.
#[derive(Error, Debug)]
pub enum HubError {
    /// Token validation failed.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// A non-auth message arrived before the auth handshake completed.
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// The connection is not registered with the hub.
    #[error("unknown connection {0}")]
    UnknownConnection(Uuid),

    /// A slow consumer's outbound queue overflowed; the connection was
    /// force-closed.
    #[error("outbound queue overflow, connection {0} dropped")]
    QueueOverflow(Uuid),

    /// The connection's outbound channel is closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(Uuid),

    /// Malformed or out-of-contract message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl HubError {
    /// Returns true if the error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::AuthRejected(_)
                | HubError::NotAuthenticated
                | HubError::QueueOverflow(_)
                | HubError::ConnectionClosed(_)
                | HubError::InvalidMessage(_)
        )
    }
}
