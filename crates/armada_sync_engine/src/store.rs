//! Client-local projection of entity state and the activity feed.

use armada_sync_protocol::{
    unix_millis_now, AcceptedEvent, EntityPayload, EntityRef, OperationKind,
};
use std::collections::{HashMap, VecDeque};

/// The client's view of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Last applied server-assigned sequence.
    pub sequence: u64,
    /// Materialized payload.
    pub payload: EntityPayload,
}

/// One human-readable line in the activity feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    /// The affected entity.
    pub entity: EntityRef,
    /// Derived message, e.g. "server:42: status running".
    pub message: String,
    /// Local wall-clock time of application, Unix milliseconds.
    pub timestamp_ms: u64,
}

/// In-memory projection applying hub events to local entity state.
///
/// Events whose sequence is not newer than what is already applied are
/// ignored with a logged warning; this tolerates the rare out-of-order
/// delivery right after a reconnect.
pub struct ReconciliationStore {
    entities: HashMap<EntityRef, EntityRecord>,
    feed: VecDeque<ActivityEntry>,
    feed_capacity: usize,
}

impl ReconciliationStore {
    /// Creates an empty store with the given activity feed capacity.
    pub fn new(feed_capacity: usize) -> Self {
        Self {
            entities: HashMap::new(),
            feed: VecDeque::new(),
            feed_capacity,
        }
    }

    /// Applies a fan-out event. Returns true if local state changed.
    pub fn apply(&mut self, accepted: &AcceptedEvent) -> bool {
        let entity = accepted.event.entity.clone();

        if let Some(record) = self.entities.get(&entity) {
            if record.sequence >= accepted.sequence {
                tracing::warn!(
                    entity = %entity,
                    applied = record.sequence,
                    incoming = accepted.sequence,
                    "ignoring stale event"
                );
                return false;
            }
        }

        if accepted.event.operation == OperationKind::Delete {
            self.entities.remove(&entity);
        } else {
            let record = self.entities.entry(entity.clone()).or_insert(EntityRecord {
                sequence: 0,
                payload: EntityPayload::empty(entity.kind),
            });
            record.payload.merge_from(&accepted.event.payload);
            record.sequence = accepted.sequence;
        }

        self.push_activity(entity, accepted.event.describe());
        true
    }

    /// Replaces local state with a full authoritative snapshot.
    ///
    /// A snapshot at sequence 0 means the entity no longer exists on the
    /// hub; the local record is removed.
    pub fn apply_snapshot(&mut self, entity: EntityRef, sequence: u64, payload: EntityPayload) {
        if sequence == 0 {
            self.entities.remove(&entity);
            return;
        }
        self.entities
            .insert(entity, EntityRecord { sequence, payload });
    }

    /// Returns the current record for an entity.
    pub fn snapshot(&self, entity: &EntityRef) -> Option<&EntityRecord> {
        self.entities.get(entity)
    }

    /// Returns all tracked entities.
    pub fn entities(&self) -> impl Iterator<Item = (&EntityRef, &EntityRecord)> {
        self.entities.iter()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entities are tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The activity feed, oldest first.
    pub fn activity_feed(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.feed.iter()
    }

    /// Truncates the activity feed.
    pub fn clear_activity_feed(&mut self) {
        self.feed.clear();
    }

    pub(crate) fn push_activity(&mut self, entity: EntityRef, message: String) {
        while self.feed.len() >= self.feed_capacity {
            self.feed.pop_front();
        }
        self.feed.push_back(ActivityEntry {
            entity,
            message,
            timestamp_ms: unix_millis_now(),
        });
    }
}
