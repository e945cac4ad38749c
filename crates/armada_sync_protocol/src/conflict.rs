//! Conflict classification and resolution.

use crate::entity::EntityRef;
use crate::payload::EntityPayload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Stale base version with overlapping fields.
    VersionMismatch,
    /// Stale base version but disjoint fields; mergeable.
    ConcurrentUpdate,
    /// The event references an entity that no longer exists.
    MissingDependency,
}

/// How a conflict was (or must be) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The incoming event wins (ground-truth override).
    AcceptLocal,
    /// The authoritative version wins; the stale intent is dropped.
    AcceptCloud,
    /// Field-level merge of both versions.
    Merge,
    /// Automatic resolution halted; the producer must resubmit.
    ManualRequired,
}

impl Resolution {
    /// Returns true if this resolution was applied without producer action.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Resolution::ManualRequired)
    }
}

/// A detected conflict between a producer's intent and authoritative state.
///
/// Created inside the conflict detector's validation step and consumed
/// immediately by the resolution policy. On `ManualRequired` it travels
/// back to the producer with both snapshots so a corrected event can be
/// resubmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// ID of the conflicting sync event.
    pub sync_event_id: Uuid,
    /// The contested entity.
    pub entity: EntityRef,
    /// Conflict classification.
    pub kind: ConflictKind,
    /// The producer's intended payload at conflict time.
    pub local_version: EntityPayload,
    /// The authoritative snapshot at conflict time.
    pub cloud_version: EntityPayload,
    /// The version the producer based its change on.
    pub base_version: u64,
    /// The authoritative sequence at conflict time.
    pub cloud_sequence: u64,
    /// The executed (or required) resolution.
    pub resolution: Resolution,
}

impl ConflictReport {
    /// Creates a new conflict report.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync_event_id: Uuid,
        entity: EntityRef,
        kind: ConflictKind,
        local_version: EntityPayload,
        cloud_version: EntityPayload,
        base_version: u64,
        cloud_sequence: u64,
        resolution: Resolution,
    ) -> Self {
        Self {
            sync_event_id,
            entity,
            kind,
            local_version,
            cloud_version,
            base_version,
            cloud_sequence,
            resolution,
        }
    }

    /// Returns true if the producer must resubmit with updated context.
    pub fn requires_resubmission(&self) -> bool {
        self.resolution == Resolution::ManualRequired
    }
}
