//! Integration tests: sync engine against a real hub.

use armada_sync_engine::{
    HubTransport, RetryConfig, SyncConfig, SyncEngine, SyncError, SyncResult,
};
use armada_sync_hub::{HubConfig, SyncHub};
use armada_sync_protocol::{
    ClientMessage, ConflictKind, EntityPayload, EntityRef, OperationKind, PluginLifecycle,
    ServerMessage, ServerStatus, SyncEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct TransportState {
    connection: Option<Uuid>,
    receiver: Option<mpsc::Receiver<ServerMessage>>,
}

/// A transport that routes messages straight into a hub, with the hub's
/// outbound stream held for manual pumping.
struct InMemoryTransport {
    hub: Arc<SyncHub>,
    state: Arc<Mutex<TransportState>>,
}

impl InMemoryTransport {
    fn new(hub: Arc<SyncHub>) -> (Self, Arc<Mutex<TransportState>>) {
        let state = Arc::new(Mutex::new(TransportState {
            connection: None,
            receiver: None,
        }));
        (
            Self {
                hub,
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl HubTransport for InMemoryTransport {
    fn connect(&self) -> SyncResult<()> {
        let (connection, receiver) = self.hub.connect();
        let mut state = self.state.lock();
        state.connection = Some(connection);
        state.receiver = Some(receiver);
        Ok(())
    }

    fn send(&self, message: &ClientMessage) -> SyncResult<()> {
        let connection = self
            .state
            .lock()
            .connection
            .ok_or(SyncError::NotConnected)?;
        self.hub
            .handle_message(connection, message.clone())
            .map_err(|error| SyncError::connection_retryable(error.to_string()))
    }

    fn close(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if let Some(connection) = state.connection.take() {
            self.hub.disconnect(connection);
        }
        state.receiver = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connection.is_some()
    }
}

/// Feeds every queued hub message into the engine.
fn pump(
    state: &Arc<Mutex<TransportState>>,
    engine: &SyncEngine<InMemoryTransport>,
    now: Instant,
) {
    loop {
        let message = {
            let mut state = state.lock();
            match state.receiver.as_mut() {
                Some(receiver) => receiver.try_recv().ok(),
                None => None,
            }
        };
        match message {
            Some(message) => {
                if let Err(error) = engine.handle_incoming(message, now) {
                    tracing::debug!(error = %error, "incoming message surfaced an error");
                }
            }
            None => break,
        }
    }
}

fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(10))
                .without_jitter(),
        )
        .with_reconnect(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(10))
                .without_jitter(),
        )
}

struct Client {
    engine: SyncEngine<InMemoryTransport>,
    state: Arc<Mutex<TransportState>>,
}

impl Client {
    fn connect(hub: &Arc<SyncHub>, now: Instant) -> Self {
        let origin = Uuid::new_v4();
        let token = hub.issue_token(origin);
        let (transport, state) = InMemoryTransport::new(Arc::clone(hub));
        let engine = SyncEngine::new(test_config(), origin, token, transport);

        engine.connect(now).unwrap();
        let client = Self { engine, state };
        client.pump(now);
        assert!(client.engine.is_connected());
        client
    }

    fn pump(&self, now: Instant) {
        pump(&self.state, &self.engine, now);
    }

    fn submit(&self, event: SyncEvent, now: Instant) {
        self.engine.submit_local(event, now).unwrap();
        self.engine.drain_outbox(now);
    }
}

fn server_update(origin: Uuid, cpu: Option<f64>, players: Option<u32>, base: u64) -> SyncEvent {
    SyncEvent::new(
        origin,
        OperationKind::Update,
        EntityRef::server("42"),
        EntityPayload::Server {
            status: None,
            cpu_usage: cpu,
            memory_usage: None,
            player_count: players,
            configuration: None,
        },
        base,
    )
    .unwrap()
}

fn status_change(origin: Uuid, status: ServerStatus, base: u64) -> SyncEvent {
    SyncEvent::new(
        origin,
        OperationKind::StatusChange,
        EntityRef::server("42"),
        EntityPayload::Server {
            status: Some(status),
            cpu_usage: None,
            memory_usage: None,
            player_count: None,
            configuration: None,
        },
        base,
    )
    .unwrap()
}

#[test]
fn full_sync_flow() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();

    let client = Client::connect(&hub, now);
    client.engine.subscribe(EntityRef::server("42")).unwrap();

    client.submit(
        status_change(client.engine.origin_id(), ServerStatus::Running, 0),
        now,
    );
    client.pump(now);

    // The fan-out echo acknowledged the outbox entry and applied locally.
    assert_eq!(client.engine.pending_deliveries(), 0);
    let record = client.engine.snapshot(&EntityRef::server("42")).unwrap();
    assert_eq!(record.sequence, 1);

    let stats = client.engine.stats();
    assert_eq!(stats.events_acknowledged, 1);
    assert_eq!(stats.events_applied, 1);

    // The activity feed derived a human-readable line.
    let feed = client.engine.activity_feed();
    assert_eq!(feed.len(), 1);
    assert!(feed[0].message.contains("running"));
}

#[test]
fn concurrent_disjoint_updates_both_survive() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();
    let entity = EntityRef::server("42");

    let alice = Client::connect(&hub, now);
    let bob = Client::connect(&hub, now);
    alice.engine.subscribe(entity.clone()).unwrap();
    bob.engine.subscribe(entity.clone()).unwrap();

    // Bring the entity to sequence 3.
    for base in 0..3 {
        alice.submit(
            server_update(alice.engine.origin_id(), Some(base as f64), None, base),
            now,
        );
        alice.pump(now);
        bob.pump(now);
    }

    // Both producers base their change on version 3 and touch disjoint
    // fields; both must survive.
    alice.submit(
        server_update(alice.engine.origin_id(), Some(80.0), None, 3),
        now,
    );
    bob.submit(
        server_update(bob.engine.origin_id(), None, Some(5), 3),
        now,
    );
    alice.pump(now);
    bob.pump(now);

    let (sequence, snapshot) = hub.registry().snapshot(&entity).unwrap();
    assert_eq!(sequence, 5);
    match &snapshot {
        EntityPayload::Server {
            cpu_usage,
            player_count,
            ..
        } => {
            assert_eq!(*cpu_usage, Some(80.0));
            assert_eq!(*player_count, Some(5));
        }
        _ => unreachable!(),
    }

    // Both projections converge to the authoritative snapshot.
    for client in [&alice, &bob] {
        let record = client.engine.snapshot(&entity).unwrap();
        assert_eq!(record.sequence, 5);
        assert_eq!(record.payload, snapshot);
    }
}

#[test]
fn overlapping_stale_update_reports_conflict() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();
    let entity = EntityRef::server("42");

    let alice = Client::connect(&hub, now);
    let bob = Client::connect(&hub, now);
    alice.engine.subscribe(entity.clone()).unwrap();
    bob.engine.subscribe(entity.clone()).unwrap();

    alice.submit(
        status_change(alice.engine.origin_id(), ServerStatus::Running, 0),
        now,
    );
    alice.pump(now);
    bob.pump(now);

    // Bob updates the same field from a stale base; the cloud version
    // wins and bob's outbox entry stops retrying.
    bob.submit(
        status_change(bob.engine.origin_id(), ServerStatus::Stopping, 0),
        now,
    );
    bob.pump(now);

    assert_eq!(bob.engine.pending_deliveries(), 0);
    let record = bob.engine.snapshot(&entity).unwrap();
    match &record.payload {
        EntityPayload::Server { status, .. } => {
            assert_eq!(*status, Some(ServerStatus::Running));
        }
        _ => unreachable!(),
    }
    // accept_cloud resolutions do not require resubmission.
    assert!(bob.engine.take_unresolved_conflicts().is_empty());
}

#[test]
fn authoritative_agent_status_wins() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();
    let entity = EntityRef::server("42");

    let dashboard = Client::connect(&hub, now);
    let agent = Client::connect(&hub, now);
    dashboard.engine.subscribe(entity.clone()).unwrap();
    agent.engine.subscribe(entity.clone()).unwrap();

    dashboard.submit(
        status_change(dashboard.engine.origin_id(), ServerStatus::Running, 0),
        now,
    );
    dashboard.pump(now);
    agent.pump(now);

    // The host agent reports a crash it observed before seeing sequence 1.
    let crashed = status_change(agent.engine.origin_id(), ServerStatus::Crashed, 0)
        .flagged_authoritative()
        .unwrap();
    agent.submit(crashed, now);
    dashboard.pump(now);
    agent.pump(now);

    for client in [&dashboard, &agent] {
        let record = client.engine.snapshot(&entity).unwrap();
        assert_eq!(record.sequence, 2);
        match &record.payload {
            EntityPayload::Server { status, .. } => {
                assert_eq!(*status, Some(ServerStatus::Crashed));
            }
            _ => unreachable!(),
        }
    }
}

#[test]
fn missing_dependency_surfaces_for_resubmission() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();

    let client = Client::connect(&hub, now);
    let install = SyncEvent::new(
        client.engine.origin_id(),
        OperationKind::Create,
        EntityRef::plugin("essentials"),
        EntityPayload::Plugin {
            lifecycle: Some(PluginLifecycle::Installing),
            version: Some("1.2.0".into()),
            error: None,
            server_id: Some("ghost".into()),
        },
        0,
    )
    .unwrap();

    client.submit(install, now);
    client.pump(now);

    // The entry stopped retrying and the report awaits resubmission.
    assert_eq!(client.engine.pending_deliveries(), 0);
    let unresolved = client.engine.take_unresolved_conflicts();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].kind, ConflictKind::MissingDependency);
    assert!(!hub.registry().contains(&EntityRef::plugin("essentials")));
}

#[test]
fn reconnect_resyncs_authoritative_snapshot() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();
    let entity = EntityRef::server("42");

    let desktop = Client::connect(&hub, now);
    let cloud = Client::connect(&hub, now);
    desktop.engine.subscribe(entity.clone()).unwrap();
    cloud.engine.subscribe(entity.clone()).unwrap();

    desktop.submit(
        status_change(desktop.engine.origin_id(), ServerStatus::Running, 0),
        now,
    );
    desktop.pump(now);
    cloud.pump(now);

    // The desktop client drops (as after an overflow-forced close).
    desktop.engine.on_disconnect("forced close", now);
    assert!(desktop.engine.is_connecting());

    // The entity keeps changing while the desktop client is away.
    cloud.submit(
        server_update(cloud.engine.origin_id(), Some(55.0), None, 1),
        now,
    );
    cloud.pump(now);
    cloud.submit(
        server_update(cloud.engine.origin_id(), None, Some(12), 2),
        now,
    );
    cloud.pump(now);

    // Reconnect: the engine re-authenticates, re-subscribes, and requests
    // a full snapshot rather than replaying missed deltas.
    let later = now + Duration::from_millis(50);
    desktop.engine.poll_reconnect(later);
    desktop.pump(later);
    assert!(desktop.engine.is_connected());

    let authoritative = hub.registry().snapshot(&entity).unwrap();
    let record = desktop.engine.snapshot(&entity).unwrap();
    assert_eq!(record.sequence, authoritative.0);
    assert_eq!(record.payload, authoritative.1);
    assert_eq!(record.sequence, 3);
}

#[test]
fn cross_entity_interleaving_converges() {
    init_tracing();
    let hub = Arc::new(SyncHub::new(HubConfig::new(b"it-secret".to_vec())));
    let now = Instant::now();

    let alice = Client::connect(&hub, now);
    let bob = Client::connect(&hub, now);

    let community = EntityRef::community("smp");
    for client in [&alice, &bob] {
        client.engine.subscribe(EntityRef::server("42")).unwrap();
        client.engine.subscribe(community.clone()).unwrap();
    }

    // Interleave writes across two entities from both producers; only
    // per-entity order matters.
    alice.submit(
        server_update(alice.engine.origin_id(), Some(10.0), None, 0),
        now,
    );
    let join = SyncEvent::new(
        bob.engine.origin_id(),
        OperationKind::Create,
        community.clone(),
        EntityPayload::Community {
            member_added: Some("alex".into()),
            member_removed: None,
            settings: None,
        },
        0,
    )
    .unwrap();
    bob.submit(join, now);
    alice.pump(now);
    bob.pump(now);

    alice.submit(
        server_update(alice.engine.origin_id(), Some(20.0), None, 1),
        now,
    );
    alice.pump(now);
    bob.pump(now);

    for client in [&alice, &bob] {
        let server = client.engine.snapshot(&EntityRef::server("42")).unwrap();
        assert_eq!(server.sequence, 2);

        let community_record = client.engine.snapshot(&community).unwrap();
        assert_eq!(community_record.sequence, 1);
    }

    assert_eq!(hub.registry().entity_count(), 2);
}
