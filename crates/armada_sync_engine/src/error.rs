//! Error types for the client sync engine.

use armada_sync_protocol::{ConflictReport, ValidationError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the client sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed event, rejected before entering the outbox.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An outbox entry exhausted its retry budget.
    #[error("delivery failed for event {event_id} after {attempts} attempts")]
    DeliveryFailed {
        /// ID of the undeliverable event.
        event_id: Uuid,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A conflict requires explicit resubmission by the producer.
    #[error("unresolved conflict on {}", .report.entity)]
    ConflictUnresolved {
        /// The full report, with local and cloud snapshots.
        report: Box<ConflictReport>,
    },

    /// Transport-level failure.
    #[error("connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
        /// Whether the reconnect loop should keep trying.
        retryable: bool,
    },

    /// The engine is not connected to the hub.
    #[error("not connected to hub")]
    NotConnected,

    /// The reconnect attempt budget was exhausted.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Malformed or unexpected message from the hub.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Creates a retryable connection error.
    pub fn connection_retryable(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a fatal connection error.
    pub fn connection_fatal(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connection { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}
