//! Sync events and construction-time validation.

use crate::entity::{EntityKind, EntityRef};
use crate::payload::EntityPayload;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Result type for event validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A malformed event, rejected before it enters the outbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload variant does not match the target entity kind.
    #[error("payload for {payload} entity does not match target kind {entity}")]
    PayloadMismatch {
        /// Kind of the target entity.
        entity: EntityKind,
        /// Kind the payload belongs to.
        payload: EntityKind,
    },

    /// Operation is not valid for the entity kind.
    #[error("operation {operation} is not valid for {entity} entities")]
    OperationNotAllowed {
        /// The attempted operation.
        operation: OperationKind,
        /// Kind of the target entity.
        entity: EntityKind,
    },

    /// Only status changes may carry the authoritative flag.
    #[error("only status_change events can be flagged authoritative")]
    NotGroundTruth,
}

/// The kind of mutation an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Entity creation.
    Create,
    /// Field-level update.
    Update,
    /// Entity deletion.
    Delete,
    /// Process status transition.
    StatusChange,
    /// Configuration/settings change.
    ConfigurationUpdate,
    /// Player session action.
    PlayerAction,
}

impl OperationKind {
    /// Returns the wire name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::StatusChange => "status_change",
            OperationKind::ConfigurationUpdate => "configuration_update",
            OperationKind::PlayerAction => "player_action",
        }
    }

    /// Returns true if this operation is allowed for the given entity kind.
    pub fn allowed_for(&self, kind: EntityKind) -> bool {
        match self {
            OperationKind::Create | OperationKind::Update | OperationKind::Delete => true,
            OperationKind::StatusChange => {
                matches!(kind, EntityKind::Server | EntityKind::Plugin)
            }
            OperationKind::ConfigurationUpdate => {
                matches!(kind, EntityKind::Server | EntityKind::Community)
            }
            OperationKind::PlayerAction => matches!(kind, EntityKind::PlayerSession),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit of change.
///
/// Events are validated at construction: the payload variant must match the
/// target entity kind and the operation must be allowed for that kind.
/// `base_version` is the entity version the producer believed was current;
/// the conflict detector compares it against the authoritative sequence.
/// `timestamp_ms` is producer wall-clock time and is advisory only; it is
/// never used for ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique event ID, generated at creation, immutable.
    pub id: Uuid,
    /// The producing connection/user, for echo handling and audit.
    pub origin_id: Uuid,
    /// The kind of mutation.
    pub operation: OperationKind,
    /// Target entity.
    pub entity: EntityRef,
    /// Operation-specific payload delta.
    pub payload: EntityPayload,
    /// Entity version the producer based this change on.
    pub base_version: u64,
    /// Ground-truth override flag (status changes from the owning process).
    #[serde(default)]
    pub authoritative: bool,
    /// Producer wall-clock time in Unix milliseconds. Advisory only.
    pub timestamp_ms: u64,
    /// Ties a request to its eventual resolution or acknowledgment.
    pub correlation_id: Uuid,
}

impl SyncEvent {
    /// Creates a validated event.
    pub fn new(
        origin_id: Uuid,
        operation: OperationKind,
        entity: EntityRef,
        payload: EntityPayload,
        base_version: u64,
    ) -> ValidationResult<Self> {
        if payload.kind() != entity.kind {
            return Err(ValidationError::PayloadMismatch {
                entity: entity.kind,
                payload: payload.kind(),
            });
        }
        if !operation.allowed_for(entity.kind) {
            return Err(ValidationError::OperationNotAllowed {
                operation,
                entity: entity.kind,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            origin_id,
            operation,
            entity,
            payload,
            base_version,
            authoritative: false,
            timestamp_ms: unix_millis_now(),
            correlation_id: Uuid::new_v4(),
        })
    }

    /// Flags this event as ground truth from the owning process.
    ///
    /// Only status changes qualify: a desktop agent reporting that the
    /// server process actually started or crashed outranks a stale cloud
    /// version of the same fields.
    pub fn flagged_authoritative(mut self) -> ValidationResult<Self> {
        if self.operation != OperationKind::StatusChange {
            return Err(ValidationError::NotGroundTruth);
        }
        self.authoritative = true;
        Ok(self)
    }

    /// Returns a human-readable description for activity feeds.
    pub fn describe(&self) -> String {
        match self.operation {
            OperationKind::Create => format!("{} created", self.entity),
            OperationKind::Delete => format!("{} deleted", self.entity),
            _ => format!("{}: {}", self.entity, self.payload.summary()),
        }
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
