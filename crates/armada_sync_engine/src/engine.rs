//! The client sync engine facade.

use crate::config::SyncConfig;
use crate::connection::{ConnectionMonitor, ConnectionState, ReconnectAction};
use crate::error::{SyncError, SyncResult};
use crate::outbox::Outbox;
use crate::store::{ActivityEntry, EntityRecord, ReconciliationStore};
use crate::transport::HubTransport;
use armada_sync_protocol::{
    ClientMessage, ConflictReport, EntityRef, ServerMessage, SyncEvent,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Counters describing engine activity.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Events submitted locally.
    pub events_submitted: u64,
    /// Events applied to the local projection.
    pub events_applied: u64,
    /// Outbox entries acknowledged by the hub.
    pub events_acknowledged: u64,
    /// Conflict reports received.
    pub conflicts_reported: u64,
    /// Outbox entries that exhausted their retry budget.
    pub delivery_failures: u64,
}

/// The client-side sync engine.
///
/// Wires together the outbox, the reconciliation store, the connection
/// monitor, and a [`HubTransport`]. The host drives it with wall-clock
/// deadlines: enqueue local mutations with [`submit_local`], call
/// [`drain_outbox`] on a timer, feed every message received from the hub
/// into [`handle_incoming`], and call [`poll_reconnect`] while disconnected.
///
/// [`submit_local`]: SyncEngine::submit_local
/// [`drain_outbox`]: SyncEngine::drain_outbox
/// [`handle_incoming`]: SyncEngine::handle_incoming
/// [`poll_reconnect`]: SyncEngine::poll_reconnect
pub struct SyncEngine<T: HubTransport> {
    origin_id: Uuid,
    token: String,
    transport: Arc<T>,
    outbox: Mutex<Outbox>,
    store: RwLock<ReconciliationStore>,
    monitor: Mutex<ConnectionMonitor>,
    subscriptions: RwLock<HashSet<EntityRef>>,
    unresolved: Mutex<Vec<ConflictReport>>,
    stats: RwLock<EngineStats>,
}

impl<T: HubTransport> SyncEngine<T> {
    /// Creates a new engine for the given origin identity.
    pub fn new(config: SyncConfig, origin_id: Uuid, token: impl Into<String>, transport: T) -> Self {
        Self {
            origin_id,
            token: token.into(),
            transport: Arc::new(transport),
            outbox: Mutex::new(Outbox::new(config.retry.clone(), config.ack_timeout)),
            store: RwLock::new(ReconciliationStore::new(config.activity_feed_capacity)),
            monitor: Mutex::new(ConnectionMonitor::new(config.reconnect.clone())),
            subscriptions: RwLock::new(HashSet::new()),
            unresolved: Mutex::new(Vec::new()),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// The origin identity this engine produces events as.
    pub fn origin_id(&self) -> Uuid {
        self.origin_id
    }

    /// Enqueues a locally originated event for delivery. Non-blocking.
    pub fn submit_local(&self, event: SyncEvent, now: Instant) -> SyncResult<Uuid> {
        if event.origin_id != self.origin_id {
            return Err(SyncError::Protocol(format!(
                "event origin {} does not match engine origin {}",
                event.origin_id, self.origin_id
            )));
        }

        let id = self.outbox.lock().enqueue(event, now);
        self.stats.write().events_submitted += 1;
        Ok(id)
    }

    /// Subscribes to an entity's event stream. Idempotent.
    pub fn subscribe(&self, entity: EntityRef) -> SyncResult<()> {
        let added = self.subscriptions.write().insert(entity.clone());
        if added && self.is_connected() {
            self.transport.send(&ClientMessage::Subscribe { entity })?;
        }
        Ok(())
    }

    /// Unsubscribes from an entity's event stream. Idempotent.
    pub fn unsubscribe(&self, entity: EntityRef) -> SyncResult<()> {
        let removed = self.subscriptions.write().remove(&entity);
        if removed && self.is_connected() {
            self.transport.send(&ClientMessage::Unsubscribe { entity })?;
        }
        Ok(())
    }

    /// Establishes the connection and starts the auth handshake.
    pub fn connect(&self, now: Instant) -> SyncResult<()> {
        self.monitor.lock().begin_connect();
        self.try_connect(now)
    }

    /// Explicit teardown. Cancels reconnect scheduling and clears the
    /// in-flight markers so queued events survive for a later connect.
    pub fn disconnect(&self, now: Instant) {
        let _ = self.transport.close();
        self.monitor.lock().reset();
        self.outbox.lock().reset_in_flight(now);
    }

    /// Records a lost connection, schedules a reconnect, and returns
    /// in-flight outbox entries to pending for redelivery.
    pub fn on_disconnect(&self, reason: impl Into<String>, now: Instant) {
        let _ = self.transport.close();
        self.monitor.lock().on_disconnect(reason, now);
        self.outbox.lock().reset_in_flight(now);
    }

    /// Polls the reconnect state machine, attempting a connection when the
    /// backoff deadline has passed.
    pub fn poll_reconnect(&self, now: Instant) -> ReconnectAction {
        let action = self.monitor.lock().poll(now);
        if action == ReconnectAction::Attempt {
            if let Err(error) = self.try_connect(now) {
                tracing::debug!(error = %error, "reconnect attempt failed");
            }
        }
        action
    }

    /// Delivers due outbox entries over the transport.
    ///
    /// Returns the delivery failures produced during this pass (entries
    /// that exhausted their retry budget), each surfaced exactly once.
    pub fn drain_outbox(&self, now: Instant) -> Vec<SyncError> {
        if !self.is_connected() {
            return Vec::new();
        }

        let outcome = self.outbox.lock().drain(now);
        let mut failures = outcome.failures;

        for event in outcome.ready {
            let event_id = event.id;
            match self.transport.send(&ClientMessage::Event(event)) {
                Ok(()) => {}
                Err(error) => {
                    if let Some(failure) = self.outbox.lock().record_failure(event_id, now) {
                        failures.push(failure);
                    }
                    self.on_disconnect(error.to_string(), now);
                    break;
                }
            }
        }

        if !failures.is_empty() {
            self.stats.write().delivery_failures += failures.len() as u64;
        }
        failures
    }

    /// Applies one message received from the hub.
    ///
    /// Returns [`SyncError::ConflictUnresolved`] when the hub reports a
    /// conflict that requires explicit resubmission; the report is also
    /// queued for [`SyncEngine::take_unresolved_conflicts`].
    pub fn handle_incoming(&self, message: ServerMessage, now: Instant) -> SyncResult<()> {
        match message {
            ServerMessage::AuthAck { origin_id } => {
                if origin_id != self.origin_id {
                    tracing::warn!(
                        expected = %self.origin_id,
                        received = %origin_id,
                        "auth ack for unexpected origin"
                    );
                }
                self.monitor.lock().on_authenticated();
                self.restore_subscriptions(now);
                Ok(())
            }
            ServerMessage::Event(accepted) => {
                if accepted.event.origin_id == self.origin_id
                    && self.outbox.lock().acknowledge(accepted.event.id)
                {
                    self.stats.write().events_acknowledged += 1;
                }
                if self.store.write().apply(&accepted) {
                    self.stats.write().events_applied += 1;
                }
                Ok(())
            }
            ServerMessage::Conflict(report) => {
                self.outbox.lock().acknowledge(report.sync_event_id);
                self.stats.write().conflicts_reported += 1;

                let mut store = self.store.write();
                if report.requires_resubmission() {
                    tracing::warn!(
                        entity = %report.entity,
                        kind = ?report.kind,
                        "conflict requires manual resolution"
                    );
                    store.push_activity(
                        report.entity.clone(),
                        format!("change to {} needs manual resolution", report.entity),
                    );
                    drop(store);
                    self.unresolved.lock().push(report.clone());
                    Err(SyncError::ConflictUnresolved {
                        report: Box::new(report),
                    })
                } else {
                    tracing::debug!(
                        entity = %report.entity,
                        resolution = ?report.resolution,
                        "conflict resolved by hub"
                    );
                    store.push_activity(
                        report.entity.clone(),
                        format!("change to {} superseded by a newer version", report.entity),
                    );
                    Ok(())
                }
            }
            ServerMessage::Snapshot {
                entity,
                sequence,
                payload,
            } => {
                self.store.write().apply_snapshot(entity, sequence, payload);
                Ok(())
            }
            ServerMessage::Error { message } => {
                tracing::warn!(message = %message, "error message from hub");
                Ok(())
            }
        }
    }

    /// Returns true when authenticated and live.
    pub fn is_connected(&self) -> bool {
        self.monitor.lock().state().is_connected()
    }

    /// Returns true while connecting, authenticating, or reconnecting.
    pub fn is_connecting(&self) -> bool {
        self.monitor.lock().state().is_connecting()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.lock().state()
    }

    /// Most recent connection error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.monitor.lock().last_error().map(String::from)
    }

    /// Local snapshot of an entity.
    pub fn snapshot(&self, entity: &EntityRef) -> Option<EntityRecord> {
        self.store.read().snapshot(entity).cloned()
    }

    /// All locally tracked entities.
    pub fn entities(&self) -> Vec<(EntityRef, EntityRecord)> {
        self.store
            .read()
            .entities()
            .map(|(entity, record)| (entity.clone(), record.clone()))
            .collect()
    }

    /// The activity feed, oldest first.
    pub fn activity_feed(&self) -> Vec<ActivityEntry> {
        self.store.read().activity_feed().cloned().collect()
    }

    /// Truncates the activity feed.
    pub fn clear_activity_feed(&self) {
        self.store.write().clear_activity_feed();
    }

    /// Conflicts awaiting explicit resubmission, clearing the queue.
    pub fn take_unresolved_conflicts(&self) -> Vec<ConflictReport> {
        std::mem::take(&mut *self.unresolved.lock())
    }

    /// Number of outbox entries awaiting delivery or acknowledgment.
    pub fn pending_deliveries(&self) -> usize {
        self.outbox.lock().live_count()
    }

    /// Number of outbox entries that exhausted their retry budget.
    pub fn dead_deliveries(&self) -> usize {
        self.outbox.lock().dead_count()
    }

    /// Engine activity counters.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    fn try_connect(&self, now: Instant) -> SyncResult<()> {
        if let Err(error) = self.transport.connect() {
            self.monitor.lock().on_disconnect(error.to_string(), now);
            return Err(error);
        }
        self.monitor.lock().on_transport_connected();

        let auth = ClientMessage::Auth {
            token: self.token.clone(),
        };
        if let Err(error) = self.transport.send(&auth) {
            self.monitor.lock().on_disconnect(error.to_string(), now);
            return Err(error);
        }
        Ok(())
    }

    /// After (re)authentication, re-subscribe to every previously active
    /// entity and request a fresh authoritative snapshot for each instead
    /// of replaying a potentially gapped event history.
    fn restore_subscriptions(&self, now: Instant) {
        let entities: Vec<EntityRef> = self.subscriptions.read().iter().cloned().collect();
        for entity in entities {
            let subscribe = ClientMessage::Subscribe {
                entity: entity.clone(),
            };
            let resync = ClientMessage::Resync { entity };
            if let Err(error) = self
                .transport
                .send(&subscribe)
                .and_then(|_| self.transport.send(&resync))
            {
                self.on_disconnect(error.to_string(), now);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use armada_sync_protocol::{
        AcceptedEvent, ConflictKind, EntityKind, EntityPayload, OperationKind, Resolution,
        ServerStatus,
    };
    use std::time::Duration;

    fn test_config() -> SyncConfig {
        SyncConfig::new()
            .with_retry(
                RetryConfig::new(2)
                    .with_initial_delay(Duration::from_millis(50))
                    .without_jitter(),
            )
            .with_reconnect(
                RetryConfig::new(2)
                    .with_initial_delay(Duration::from_millis(50))
                    .without_jitter(),
            )
    }

    fn connected_engine() -> SyncEngine<MockTransport> {
        let origin = Uuid::new_v4();
        let engine = SyncEngine::new(test_config(), origin, "token", MockTransport::new());
        engine.connect(Instant::now()).unwrap();
        engine
            .handle_incoming(
                ServerMessage::AuthAck { origin_id: origin },
                Instant::now(),
            )
            .unwrap();
        engine
    }

    fn status_event(origin: Uuid, base_version: u64) -> SyncEvent {
        SyncEvent::new(
            origin,
            OperationKind::StatusChange,
            EntityRef::server("42"),
            EntityPayload::Server {
                status: Some(ServerStatus::Running),
                cpu_usage: None,
                memory_usage: None,
                player_count: None,
                configuration: None,
            },
            base_version,
        )
        .unwrap()
    }

    #[test]
    fn connect_sends_auth() {
        let engine = connected_engine();
        assert!(engine.is_connected());

        let transport = &engine.transport;
        assert!(matches!(
            transport.sent().first(),
            Some(ClientMessage::Auth { .. })
        ));
    }

    #[test]
    fn submit_and_drain_delivers_event() {
        let now = Instant::now();
        let engine = connected_engine();

        let event = status_event(engine.origin_id(), 0);
        let id = engine.submit_local(event, now).unwrap();
        assert_eq!(engine.pending_deliveries(), 1);

        let failures = engine.drain_outbox(now);
        assert!(failures.is_empty());

        let sent = engine.transport.sent();
        assert!(sent
            .iter()
            .any(|m| matches!(m, ClientMessage::Event(e) if e.id == id)));
    }

    #[test]
    fn foreign_origin_rejected() {
        let engine = connected_engine();
        let event = status_event(Uuid::new_v4(), 0);

        let result = engine.submit_local(event, Instant::now());
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn echo_acknowledges_and_applies() {
        let now = Instant::now();
        let engine = connected_engine();

        let event = status_event(engine.origin_id(), 0);
        engine.submit_local(event.clone(), now).unwrap();
        engine.drain_outbox(now);

        engine
            .handle_incoming(
                ServerMessage::Event(AcceptedEvent { sequence: 1, event }),
                now,
            )
            .unwrap();

        assert_eq!(engine.pending_deliveries(), 0);
        let record = engine.snapshot(&EntityRef::server("42")).unwrap();
        assert_eq!(record.sequence, 1);

        let stats = engine.stats();
        assert_eq!(stats.events_acknowledged, 1);
        assert_eq!(stats.events_applied, 1);
    }

    #[test]
    fn manual_conflict_is_surfaced() {
        let now = Instant::now();
        let engine = connected_engine();

        let event = status_event(engine.origin_id(), 0);
        let id = engine.submit_local(event, now).unwrap();
        engine.drain_outbox(now);

        let report = ConflictReport::new(
            id,
            EntityRef::server("42"),
            ConflictKind::MissingDependency,
            EntityPayload::empty(EntityKind::Server),
            EntityPayload::empty(EntityKind::Server),
            0,
            3,
            Resolution::ManualRequired,
        );
        let result = engine.handle_incoming(ServerMessage::Conflict(report), now);
        assert!(matches!(
            result,
            Err(SyncError::ConflictUnresolved { .. })
        ));

        // The entry stops retrying and the report is queued for the caller.
        assert_eq!(engine.pending_deliveries(), 0);
        let unresolved = engine.take_unresolved_conflicts();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].sync_event_id, id);
        assert!(engine.take_unresolved_conflicts().is_empty());
    }

    #[test]
    fn send_failures_exhaust_into_delivery_failure() {
        let now = Instant::now();
        let engine = connected_engine();
        engine.transport.set_fail_sends(true);

        let event = status_event(engine.origin_id(), 0);
        engine.submit_local(event, now).unwrap();

        // First attempt fails and drops the connection.
        assert!(engine.drain_outbox(now).is_empty());
        assert!(!engine.is_connected());

        // Reconnect and fail the second (final) attempt.
        let later = now + Duration::from_millis(100);
        engine.transport.set_fail_sends(false);
        engine.poll_reconnect(later);
        engine
            .handle_incoming(
                ServerMessage::AuthAck {
                    origin_id: engine.origin_id(),
                },
                later,
            )
            .unwrap();
        assert!(engine.is_connected());

        engine.transport.set_fail_sends(true);
        let final_try = later + Duration::from_millis(100);
        let failures = engine.drain_outbox(final_try);
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            SyncError::DeliveryFailed { attempts: 2, .. }
        ));
        assert_eq!(engine.dead_deliveries(), 1);
    }

    #[test]
    fn reconnect_restores_subscriptions() {
        let now = Instant::now();
        let engine = connected_engine();

        engine.subscribe(EntityRef::server("42")).unwrap();
        engine.transport.clear_sent();

        engine.on_disconnect("socket reset", now);
        assert!(engine.is_connecting());
        assert_eq!(engine.last_error(), Some("socket reset".into()));

        let later = now + Duration::from_millis(100);
        assert_eq!(engine.poll_reconnect(later), ReconnectAction::Attempt);
        engine
            .handle_incoming(
                ServerMessage::AuthAck {
                    origin_id: engine.origin_id(),
                },
                later,
            )
            .unwrap();

        let sent = engine.transport.sent();
        assert!(sent
            .iter()
            .any(|m| matches!(m, ClientMessage::Subscribe { entity } if entity.id == "42")));
        assert!(sent
            .iter()
            .any(|m| matches!(m, ClientMessage::Resync { entity } if entity.id == "42")));
    }

    #[test]
    fn reconnect_budget_exhaustion_surfaces() {
        let now = Instant::now();
        let origin = Uuid::new_v4();
        let transport = MockTransport::new();
        transport.set_fail_connects(true);
        let engine = SyncEngine::new(test_config(), origin, "token", transport);

        assert!(engine.connect(now).is_err());

        let later = now + Duration::from_secs(1);
        engine.poll_reconnect(later);

        assert_eq!(
            engine.poll_reconnect(later + Duration::from_secs(1)),
            ReconnectAction::GiveUp
        );
        assert_eq!(engine.connection_state(), ConnectionState::Failed);
        assert!(engine.last_error().is_some());
    }
}
