//! Outbox for locally originated events awaiting hub acknowledgment.

use crate::config::RetryConfig;
use crate::error::SyncError;
use armada_sync_protocol::{EntityRef, SyncEvent};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// Waiting for a delivery attempt.
    Pending,
    /// Sent, awaiting acknowledgment from the hub.
    InFlight,
    /// Acknowledged by the hub. Terminal.
    Acknowledged,
    /// Retry budget exhausted. Terminal, requires explicit resubmission.
    Dead,
}

impl OutboxState {
    /// Returns true for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxState::Acknowledged | OutboxState::Dead)
    }
}

/// A sync event wrapped with delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// The wrapped event.
    pub event: SyncEvent,
    /// Current delivery state.
    pub state: OutboxState,
    /// Completed (failed or timed-out) delivery attempts.
    pub attempts: u32,
    /// Earliest time the next delivery attempt may run.
    pub next_retry_at: Instant,
    in_flight_since: Option<Instant>,
}

impl OutboxEntry {
    fn new(event: SyncEvent, now: Instant) -> Self {
        Self {
            event,
            state: OutboxState::Pending,
            attempts: 0,
            next_retry_at: now,
            in_flight_since: None,
        }
    }
}

/// Result of an outbox drain pass.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Events to deliver now, in per-entity enqueue order.
    pub ready: Vec<SyncEvent>,
    /// Entries that exhausted their budget during this pass.
    pub failures: Vec<SyncError>,
}

/// Per-origin queue of not-yet-acknowledged sync events.
///
/// Entries for the same entity are delivered strictly in enqueue order and
/// at most one is in flight at a time; entries for different entities drain
/// independently. An entry that exhausts its retry budget moves to `Dead`
/// exactly once and surfaces a [`SyncError::DeliveryFailed`]; it is never
/// silently dropped and never retried automatically again.
pub struct Outbox {
    entries: Vec<OutboxEntry>,
    retry: RetryConfig,
    ack_timeout: Duration,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new(retry: RetryConfig, ack_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            retry,
            ack_timeout,
        }
    }

    /// Appends an event in `Pending` state. Non-blocking; returns the
    /// event's ID, which doubles as the entry ID.
    pub fn enqueue(&mut self, event: SyncEvent, now: Instant) -> Uuid {
        let id = event.id;
        self.entries.push(OutboxEntry::new(event, now));
        id
    }

    /// Collects events whose delivery attempt is due.
    ///
    /// In-flight entries whose acknowledgment window has elapsed first
    /// revert to pending (counting an attempt), then the oldest eligible
    /// pending entry per entity is marked in flight and returned.
    pub fn drain(&mut self, now: Instant) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();

        // Expire in-flight entries that never got their acknowledgment.
        for index in 0..self.entries.len() {
            let timed_out = {
                let entry = &self.entries[index];
                entry.state == OutboxState::InFlight
                    && entry
                        .in_flight_since
                        .is_some_and(|since| now.duration_since(since) >= self.ack_timeout)
            };
            if timed_out {
                tracing::debug!(
                    event_id = %self.entries[index].event.id,
                    "acknowledgment window elapsed, reverting to pending"
                );
                if let Some(failure) = self.register_failure(index, now) {
                    outcome.failures.push(failure);
                }
            }
        }

        // One candidate per entity: the oldest non-terminal entry, and only
        // if it is pending and due.
        let mut blocked: HashSet<EntityRef> = HashSet::new();
        for entry in &mut self.entries {
            if entry.state.is_terminal() {
                continue;
            }
            if blocked.contains(&entry.event.entity) {
                continue;
            }
            if entry.state == OutboxState::Pending && entry.next_retry_at <= now {
                entry.state = OutboxState::InFlight;
                entry.in_flight_since = Some(now);
                outcome.ready.push(entry.event.clone());
            }
            blocked.insert(entry.event.entity.clone());
        }

        outcome
    }

    /// Marks an entry acknowledged. Returns false if no live entry matches.
    pub fn acknowledge(&mut self, event_id: Uuid) -> bool {
        match self.find_live(event_id) {
            Some(entry) => {
                entry.state = OutboxState::Acknowledged;
                entry.in_flight_since = None;
                true
            }
            None => false,
        }
    }

    /// Records a failed delivery attempt.
    ///
    /// Returns `Some(SyncError::DeliveryFailed)` exactly once, on the
    /// attempt that exhausts the budget.
    pub fn record_failure(&mut self, event_id: Uuid, now: Instant) -> Option<SyncError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.event.id == event_id && !e.state.is_terminal())?;
        self.register_failure(index, now)
    }

    /// Returns in-flight entries to pending without counting an attempt.
    ///
    /// Called on disconnect: a delivery interrupted by a dropped connection
    /// is redelivered after reconnect, not penalized.
    pub fn reset_in_flight(&mut self, now: Instant) {
        for entry in &mut self.entries {
            if entry.state == OutboxState::InFlight {
                entry.state = OutboxState::Pending;
                entry.in_flight_since = None;
                entry.next_retry_at = now;
            }
        }
    }

    /// Removes acknowledged entries.
    pub fn compact(&mut self) {
        self.entries
            .retain(|entry| entry.state != OutboxState::Acknowledged);
    }

    /// Number of entries still awaiting delivery or acknowledgment.
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.state.is_terminal())
            .count()
    }

    /// Number of dead entries awaiting operator attention.
    pub fn dead_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == OutboxState::Dead)
            .count()
    }

    /// Dead entries, for surfacing as user-actionable errors.
    pub fn dead_entries(&self) -> Vec<&OutboxEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == OutboxState::Dead)
            .collect()
    }

    /// Looks up an entry's state by event ID.
    pub fn state_of(&self, event_id: Uuid) -> Option<OutboxState> {
        self.entries
            .iter()
            .find(|e| e.event.id == event_id)
            .map(|e| e.state)
    }

    /// Returns true if no entries are queued at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_live(&mut self, event_id: Uuid) -> Option<&mut OutboxEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.event.id == event_id && !e.state.is_terminal())
    }

    fn register_failure(&mut self, index: usize, now: Instant) -> Option<SyncError> {
        let max_attempts = self.retry.max_attempts;
        let entry = &mut self.entries[index];

        entry.attempts += 1;
        entry.in_flight_since = None;

        if entry.attempts >= max_attempts {
            entry.state = OutboxState::Dead;
            tracing::warn!(
                event_id = %entry.event.id,
                attempts = entry.attempts,
                entity = %entry.event.entity,
                "outbox entry exhausted retry budget"
            );
            return Some(SyncError::DeliveryFailed {
                event_id: entry.event.id,
                attempts: entry.attempts,
            });
        }

        entry.state = OutboxState::Pending;
        entry.next_retry_at = now + self.retry.delay_for_attempt(entry.attempts);
        None
    }
}
