//! The conflict detector: sole authority over entity versions.

use armada_sync_protocol::{
    AcceptedEvent, ConflictKind, ConflictReport, EntityPayload, EntityRef, OperationKind,
    Resolution, SyncEvent,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Authoritative per-entity state. Mutated only by [`EntityRegistry`].
#[derive(Debug, Clone)]
pub struct EntityVersion {
    /// Monotonic server-assigned sequence, the sole ordering authority.
    pub sequence: u64,
    /// Materialized payload.
    pub snapshot: EntityPayload,
    /// Origin of the last accepted write.
    pub last_writer: Uuid,
}

#[derive(Debug)]
struct ChangeSet {
    sequence: u64,
    fields: BTreeSet<String>,
}

#[derive(Debug)]
struct EntityState {
    version: EntityVersion,
    history: VecDeque<ChangeSet>,
    deleted: bool,
}

impl EntityState {
    fn new(entity: &EntityRef) -> Self {
        Self {
            version: EntityVersion {
                sequence: 0,
                snapshot: EntityPayload::empty(entity.kind),
                last_writer: Uuid::nil(),
            },
            history: VecDeque::new(),
            deleted: false,
        }
    }

    /// Union of fields changed by sequences greater than `base`, or `None`
    /// when the retained history no longer covers `base`.
    fn changed_fields_since(&self, base: u64) -> Option<BTreeSet<String>> {
        match self.history.front() {
            Some(oldest) if base + 1 < oldest.sequence => return None,
            None if self.version.sequence > base => return None,
            _ => {}
        }

        let mut fields = BTreeSet::new();
        for change in &self.history {
            if change.sequence > base {
                fields.extend(change.fields.iter().cloned());
            }
        }
        Some(fields)
    }

    fn record_change(&mut self, sequence: u64, fields: BTreeSet<String>, window: usize) {
        self.history.push_back(ChangeSet { sequence, fields });
        while self.history.len() > window {
            self.history.pop_front();
        }
    }
}

/// Outcome of submitting one event to the detector.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Applied and assigned a sequence; fanned out to subscribers.
    Accepted {
        /// The accepted event with its sequence.
        accepted: AcceptedEvent,
        /// Resolution executed for a stale base version; `None` on the
        /// fast path.
        resolution: Option<Resolution>,
    },
    /// Stale intent dropped in favor of the authoritative version
    /// (`accept_cloud`). Nothing applied; only the producer is told.
    Dropped(ConflictReport),
    /// Manual resolution required. Nothing applied; the producer must
    /// resubmit with updated context.
    Rejected(ConflictReport),
}

/// A [`Submission`] plus whether it was replayed from the dedup table.
#[derive(Debug)]
pub struct SubmitResult {
    /// The (first) outcome for this event.
    pub outcome: Submission,
    /// True when this event was already processed and the stored outcome
    /// is being replayed; nothing was applied or fanned out again.
    pub duplicate: bool,
}

/// Process-wide table of authoritative entity versions.
///
/// Entries are created lazily on the first event for an entity and removed
/// only by an accepted delete. All validation and application for one
/// entity runs under that entity's mutex: at most one event per entity at a
/// time, different entities fully in parallel. Redelivered events are
/// deduplicated on `(origin, event id)` and replay their original outcome
/// without advancing the sequence.
pub struct EntityRegistry {
    entities: RwLock<HashMap<EntityRef, Arc<Mutex<EntityState>>>>,
    seen: Mutex<HashMap<(Uuid, Uuid), Submission>>,
    history_window: usize,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new(history_window: usize) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
            history_window,
        }
    }

    /// Submits an event for validation and application.
    pub fn submit(&self, event: SyncEvent) -> SubmitResult {
        self.submit_with(event, |_| {})
    }

    /// Submits an event; `on_accept` runs inside the entity's critical
    /// section for each fresh acceptance, so fan-out observes acceptance
    /// order.
    pub fn submit_with(
        &self,
        event: SyncEvent,
        on_accept: impl FnOnce(&AcceptedEvent),
    ) -> SubmitResult {
        let dedup_key = (event.origin_id, event.id);
        if let Some(prior) = self.seen.lock().get(&dedup_key).cloned() {
            tracing::debug!(event_id = %event.id, "replaying outcome for redelivered event");
            return SubmitResult {
                outcome: prior,
                duplicate: true,
            };
        }

        // Dependency check runs on every path: a plugin install or player
        // session naming a server that no longer exists cannot be applied,
        // stale base version or not.
        if let Some(server_id) = event.payload.server_dependency() {
            if !self.contains(&EntityRef::server(server_id)) {
                let (cloud_sequence, cloud_version) = self
                    .snapshot(&event.entity)
                    .unwrap_or_else(|| (0, EntityPayload::empty(event.entity.kind)));
                let report = ConflictReport::new(
                    event.id,
                    event.entity.clone(),
                    ConflictKind::MissingDependency,
                    event.payload.clone(),
                    cloud_version,
                    event.base_version,
                    cloud_sequence,
                    Resolution::ManualRequired,
                );
                tracing::warn!(
                    entity = %event.entity,
                    server_id,
                    "rejecting event with missing server dependency"
                );
                let outcome = Submission::Rejected(report);
                self.seen.lock().insert(dedup_key, outcome.clone());
                return SubmitResult {
                    outcome,
                    duplicate: false,
                };
            }
        }

        loop {
            let slot = {
                let map = self.entities.read();
                map.get(&event.entity).cloned()
            };
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    let mut map = self.entities.write();
                    map.entry(event.entity.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(EntityState::new(&event.entity))))
                        .clone()
                }
            };

            let mut state = slot.lock();
            if state.deleted {
                // Lost a race with an accepted delete; the map entry is
                // gone, so look up (and possibly recreate) again.
                continue;
            }

            let outcome = self.evaluate(&mut state, event, on_accept);

            let remove = state.deleted;
            drop(state);
            if remove {
                self.entities.write().remove(&dedup_key_entity(&outcome));
            }

            self.seen.lock().insert(dedup_key, outcome.clone());
            return SubmitResult {
                outcome,
                duplicate: false,
            };
        }
    }

    /// Returns true if the entity currently exists.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entities.read().contains_key(entity)
    }

    /// Authoritative sequence and snapshot for an entity.
    pub fn snapshot(&self, entity: &EntityRef) -> Option<(u64, EntityPayload)> {
        let slot = self.entities.read().get(entity).cloned()?;
        let state = slot.lock();
        if state.deleted {
            return None;
        }
        Some((state.version.sequence, state.version.snapshot.clone()))
    }

    /// Full authoritative version record for an entity.
    pub fn version(&self, entity: &EntityRef) -> Option<EntityVersion> {
        let slot = self.entities.read().get(entity).cloned()?;
        let state = slot.lock();
        if state.deleted {
            return None;
        }
        Some(state.version.clone())
    }

    /// Number of tracked entities.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    fn evaluate(
        &self,
        state: &mut EntityState,
        event: SyncEvent,
        on_accept: impl FnOnce(&AcceptedEvent),
    ) -> Submission {
        let current = state.version.sequence;

        // First event for this entity: a creation, whatever base version
        // the producer claimed.
        if current == 0 || event.base_version == current {
            return self.apply(state, event, None, on_accept);
        }

        if event.base_version > current {
            // The producer claims a version the authority never assigned.
            tracing::warn!(
                entity = %event.entity,
                base_version = event.base_version,
                sequence = current,
                "producer ahead of authority"
            );
            let report = self.report(state, &event, ConflictKind::VersionMismatch, Resolution::ManualRequired);
            return Submission::Rejected(report);
        }

        // Stale base version: classify against the fields changed since.
        match state.changed_fields_since(event.base_version) {
            Some(changed) if event.payload.is_disjoint_from(&changed) => {
                tracing::debug!(
                    entity = %event.entity,
                    base_version = event.base_version,
                    sequence = current,
                    "merging concurrent disjoint update"
                );
                self.apply(state, event, Some(Resolution::Merge), on_accept)
            }
            _ => {
                if event.authoritative {
                    tracing::debug!(
                        entity = %event.entity,
                        "authoritative status change overrides newer version"
                    );
                    self.apply(state, event, Some(Resolution::AcceptLocal), on_accept)
                } else {
                    let report = self.report(
                        state,
                        &event,
                        ConflictKind::VersionMismatch,
                        Resolution::AcceptCloud,
                    );
                    Submission::Dropped(report)
                }
            }
        }
    }

    fn apply(
        &self,
        state: &mut EntityState,
        event: SyncEvent,
        resolution: Option<Resolution>,
        on_accept: impl FnOnce(&AcceptedEvent),
    ) -> Submission {
        let sequence = state.version.sequence + 1;
        state.version.sequence = sequence;
        state.version.snapshot.merge_from(&event.payload);
        state.version.last_writer = event.origin_id;
        state.record_change(sequence, event.payload.field_keys(), self.history_window);

        if event.operation == OperationKind::Delete {
            state.deleted = true;
        }

        let accepted = AcceptedEvent { sequence, event };
        on_accept(&accepted);
        Submission::Accepted {
            accepted,
            resolution,
        }
    }

    fn report(
        &self,
        state: &EntityState,
        event: &SyncEvent,
        kind: ConflictKind,
        resolution: Resolution,
    ) -> ConflictReport {
        ConflictReport::new(
            event.id,
            event.entity.clone(),
            kind,
            event.payload.clone(),
            state.version.snapshot.clone(),
            event.base_version,
            state.version.sequence,
            resolution,
        )
    }
}

/// Entity of a submission outcome, for post-delete map cleanup.
fn dedup_key_entity(outcome: &Submission) -> EntityRef {
    match outcome {
        Submission::Accepted { accepted, .. } => accepted.event.entity.clone(),
        Submission::Dropped(report) | Submission::Rejected(report) => report.entity.clone(),
    }
}
