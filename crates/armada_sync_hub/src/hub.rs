//! Connection and subscription management with bounded fan-out queues.

use crate::error::{HubError, HubResult};
use armada_sync_protocol::{EntityRef, ServerMessage};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

struct ConnectionHandle {
    outbound: mpsc::Sender<ServerMessage>,
    origin_id: Option<Uuid>,
}

/// Routes accepted events to subscribed connections.
///
/// Each connection owns a bounded outbound queue. A consumer too slow to
/// keep up overflows its queue and is dropped, forcing a reconnect and
/// full resync, rather than buffering unbounded memory or blocking other
/// consumers.
pub struct DispatchHub {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    subscriptions: RwLock<HashMap<EntityRef, HashSet<Uuid>>>,
    queue_depth: usize,
}

impl DispatchHub {
    /// Creates a hub with the given per-connection queue depth.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Registers a new, unauthenticated connection. The receiver is the
    /// connection's outbound message stream; it closes when the hub drops
    /// the connection.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let connection_id = Uuid::new_v4();
        self.connections.write().insert(
            connection_id,
            ConnectionHandle {
                outbound: sender,
                origin_id: None,
            },
        );
        tracing::debug!(connection = %connection_id, "connection registered");
        (connection_id, receiver)
    }

    /// Binds an authenticated origin to a connection.
    pub fn authenticate(&self, connection_id: Uuid, origin_id: Uuid) -> HubResult<()> {
        let mut connections = self.connections.write();
        let handle = connections
            .get_mut(&connection_id)
            .ok_or(HubError::UnknownConnection(connection_id))?;
        handle.origin_id = Some(origin_id);
        Ok(())
    }

    /// The origin bound to a connection, if authenticated.
    pub fn origin_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections
            .read()
            .get(&connection_id)?
            .origin_id
    }

    /// Returns true once the connection has authenticated.
    pub fn is_authenticated(&self, connection_id: Uuid) -> bool {
        self.origin_of(connection_id).is_some()
    }

    /// Adds a subscription. Idempotent.
    pub fn subscribe(&self, connection_id: Uuid, entity: EntityRef) -> HubResult<()> {
        if !self.connections.read().contains_key(&connection_id) {
            return Err(HubError::UnknownConnection(connection_id));
        }
        self.subscriptions
            .write()
            .entry(entity)
            .or_default()
            .insert(connection_id);
        Ok(())
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&self, connection_id: Uuid, entity: &EntityRef) -> HubResult<()> {
        let mut subscriptions = self.subscriptions.write();
        if let Some(set) = subscriptions.get_mut(entity) {
            set.remove(&connection_id);
            if set.is_empty() {
                subscriptions.remove(entity);
            }
        }
        Ok(())
    }

    /// Returns true if the connection subscribes to the entity.
    pub fn is_subscribed(&self, connection_id: Uuid, entity: &EntityRef) -> bool {
        self.subscriptions
            .read()
            .get(entity)
            .is_some_and(|set| set.contains(&connection_id))
    }

    /// Removes a connection and all of its subscriptions immediately.
    pub fn disconnect(&self, connection_id: Uuid) {
        let removed = self.connections.write().remove(&connection_id).is_some();
        if removed {
            tracing::debug!(connection = %connection_id, "connection removed");
        }
        let mut subscriptions = self.subscriptions.write();
        subscriptions.retain(|_, set| {
            set.remove(&connection_id);
            !set.is_empty()
        });
    }

    /// Sends one message to one connection.
    ///
    /// A full outbound queue is a fatal condition for that connection: it
    /// is dropped and [`HubError::QueueOverflow`] is returned.
    pub fn send_to(&self, connection_id: Uuid, message: ServerMessage) -> HubResult<()> {
        let sender = {
            let connections = self.connections.read();
            let handle = connections
                .get(&connection_id)
                .ok_or(HubError::UnknownConnection(connection_id))?;
            handle.outbound.clone()
        };

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection = %connection_id,
                    "outbound queue overflow, dropping connection"
                );
                self.disconnect(connection_id);
                Err(HubError::QueueOverflow(connection_id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(connection_id);
                Err(HubError::ConnectionClosed(connection_id))
            }
        }
    }

    /// Fans a message out to every subscriber of an entity. Returns the
    /// number of connections that received it; slow or closed consumers
    /// are dropped along the way.
    pub fn publish(&self, entity: &EntityRef, message: &ServerMessage) -> usize {
        let targets: Vec<Uuid> = self
            .subscriptions
            .read()
            .get(entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for connection_id in targets {
            match self.send_to(connection_id, message.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::debug!(
                        connection = %connection_id,
                        error = %error,
                        "subscriber dropped during fan-out"
                    );
                }
            }
        }
        delivered
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of connections subscribed to an entity.
    pub fn subscriber_count(&self, entity: &EntityRef) -> usize {
        self.subscriptions
            .read()
            .get(entity)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_message(text: &str) -> ServerMessage {
        ServerMessage::Error {
            message: text.into(),
        }
    }

    #[tokio::test]
    async fn register_and_send() {
        let hub = DispatchHub::new(4);
        let (connection, mut receiver) = hub.register();
        assert_eq!(hub.connection_count(), 1);

        hub.send_to(connection, error_message("hello")).unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received, error_message("hello"));
    }

    #[tokio::test]
    async fn authentication_binding() {
        let hub = DispatchHub::new(4);
        let (connection, _receiver) = hub.register();

        assert!(!hub.is_authenticated(connection));
        let origin = Uuid::new_v4();
        hub.authenticate(connection, origin).unwrap();
        assert_eq!(hub.origin_of(connection), Some(origin));

        let unknown = Uuid::new_v4();
        assert!(matches!(
            hub.authenticate(unknown, origin),
            Err(HubError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn publish_reaches_only_subscribers() {
        let hub = DispatchHub::new(4);
        let (subscriber, mut sub_rx) = hub.register();
        let (_bystander, mut other_rx) = hub.register();

        let entity = EntityRef::server("42");
        hub.subscribe(subscriber, entity.clone()).unwrap();

        let delivered = hub.publish(&entity, &error_message("fan-out"));
        assert_eq!(delivered, 1);

        assert!(sub_rx.recv().await.is_some());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let hub = DispatchHub::new(4);
        let (connection, _receiver) = hub.register();

        let entity = EntityRef::server("42");
        hub.subscribe(connection, entity.clone()).unwrap();
        hub.subscribe(connection, entity.clone()).unwrap();
        assert_eq!(hub.subscriber_count(&entity), 1);

        hub.unsubscribe(connection, &entity).unwrap();
        hub.unsubscribe(connection, &entity).unwrap();
        assert_eq!(hub.subscriber_count(&entity), 0);
    }

    #[tokio::test]
    async fn overflow_drops_the_slow_connection() {
        let hub = DispatchHub::new(2);
        let (slow, _slow_rx) = hub.register();
        let (healthy, mut healthy_rx) = hub.register();

        let entity = EntityRef::server("42");
        hub.subscribe(slow, entity.clone()).unwrap();
        hub.subscribe(healthy, entity.clone()).unwrap();

        // The slow consumer never drains; its queue holds 2 messages.
        for round in 0..3 {
            hub.publish(&entity, &error_message(&format!("round {round}")));
            // Keep the healthy consumer drained.
            while healthy_rx.try_recv().is_ok() {}
        }

        // The third publish overflowed the slow connection.
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.subscriber_count(&entity), 1);
        assert!(hub.origin_of(slow).is_none());
    }

    #[tokio::test]
    async fn disconnect_removes_subscriptions_immediately() {
        let hub = DispatchHub::new(4);
        let (connection, _receiver) = hub.register();

        hub.subscribe(connection, EntityRef::server("1")).unwrap();
        hub.subscribe(connection, EntityRef::server("2")).unwrap();

        hub.disconnect(connection);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count(&EntityRef::server("1")), 0);
        assert_eq!(hub.subscriber_count(&EntityRef::server("2")), 0);

        assert!(matches!(
            hub.send_to(connection, error_message("late")),
            Err(HubError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn receiver_closes_when_dropped_by_hub() {
        let hub = DispatchHub::new(4);
        let (connection, mut receiver) = hub.register();

        hub.disconnect(connection);
        assert!(receiver.recv().await.is_none());
    }
}
