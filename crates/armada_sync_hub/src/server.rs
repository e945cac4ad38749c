//! The hub facade: auth, message dispatch, conflict detection, fan-out.

use crate::auth::TokenValidator;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::hub::DispatchHub;
use crate::registry::{EntityRegistry, Submission};
use armada_sync_protocol::{ClientMessage, EntityPayload, ServerMessage, SyncEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The sync hub.
///
/// Accepts authenticated connections, validates incoming events through
/// the conflict detector, and fans accepted events out to subscribers in
/// per-entity acceptance order. The transport layer (WebSocket, IPC) hands
/// each connection's inbound frames to [`SyncHub::handle_text`] or
/// [`SyncHub::handle_message`] and forwards the registered receiver's
/// messages back to the client.
pub struct SyncHub {
    config: HubConfig,
    registry: EntityRegistry,
    dispatch: DispatchHub,
    validator: TokenValidator,
}

impl SyncHub {
    /// Creates a hub from configuration.
    pub fn new(config: HubConfig) -> Self {
        let validator = TokenValidator::new(config.auth_secret.clone(), config.token_expiry);
        let registry = EntityRegistry::new(config.history_window);
        let dispatch = DispatchHub::new(config.outbound_queue_depth);
        Self {
            config,
            registry,
            dispatch,
            validator,
        }
    }

    /// The hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The conflict detector.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Issues an auth token for an origin (normally done by the session
    /// service; exposed for tools and tests).
    pub fn issue_token(&self, origin_id: Uuid) -> String {
        self.validator.create_token(origin_id)
    }

    /// Registers a new connection. The receiver carries everything the hub
    /// pushes to this client and closes when the hub drops it.
    pub fn connect(&self) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        self.dispatch.register()
    }

    /// Removes a connection and its subscriptions.
    pub fn disconnect(&self, connection_id: Uuid) {
        self.dispatch.disconnect(connection_id);
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.dispatch.connection_count()
    }

    /// Parses and handles one inbound JSON frame.
    pub fn handle_text(&self, connection_id: Uuid, text: &str) -> HubResult<()> {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(connection_id, message),
            Err(error) => {
                let reason = format!("malformed message: {error}");
                self.fail_connection(connection_id, &reason);
                Err(HubError::InvalidMessage(reason))
            }
        }
    }

    /// Handles one inbound message.
    ///
    /// A fatal error (failed auth, traffic before auth, origin spoofing)
    /// closes the connection after an error message is attempted.
    pub fn handle_message(&self, connection_id: Uuid, message: ClientMessage) -> HubResult<()> {
        let message = match message {
            ClientMessage::Auth { token } => return self.handle_auth(connection_id, &token),
            other => other,
        };

        let origin_id = match self.dispatch.origin_of(connection_id) {
            Some(origin_id) => origin_id,
            None => {
                self.fail_connection(connection_id, "authentication required");
                return Err(HubError::NotAuthenticated);
            }
        };

        match message {
            ClientMessage::Auth { .. } => unreachable!("returned above"),
            ClientMessage::Subscribe { entity } => self.dispatch.subscribe(connection_id, entity),
            ClientMessage::Unsubscribe { entity } => {
                self.dispatch.unsubscribe(connection_id, &entity)
            }
            ClientMessage::Resync { entity } => {
                let (sequence, payload) = self
                    .registry
                    .snapshot(&entity)
                    .unwrap_or_else(|| (0, EntityPayload::empty(entity.kind)));
                self.dispatch.send_to(
                    connection_id,
                    ServerMessage::Snapshot {
                        entity,
                        sequence,
                        payload,
                    },
                )
            }
            ClientMessage::Event(event) => self.handle_event(connection_id, origin_id, event),
        }
    }

    fn handle_auth(&self, connection_id: Uuid, token: &str) -> HubResult<()> {
        match self.validator.validate(token) {
            Ok(origin_id) => {
                self.dispatch.authenticate(connection_id, origin_id)?;
                tracing::info!(
                    connection = %connection_id,
                    origin = %origin_id,
                    "connection authenticated"
                );
                self.dispatch
                    .send_to(connection_id, ServerMessage::AuthAck { origin_id })
            }
            Err(error) => {
                tracing::warn!(
                    connection = %connection_id,
                    error = %error,
                    "authentication failed"
                );
                self.fail_connection(connection_id, "authentication failed");
                Err(error)
            }
        }
    }

    fn handle_event(
        &self,
        connection_id: Uuid,
        origin_id: Uuid,
        event: SyncEvent,
    ) -> HubResult<()> {
        if event.origin_id != origin_id {
            self.fail_connection(connection_id, "event origin does not match connection");
            return Err(HubError::InvalidMessage(format!(
                "event origin {} does not match connection origin {}",
                event.origin_id, origin_id
            )));
        }

        let entity = event.entity.clone();
        let subscribed = self.dispatch.is_subscribed(connection_id, &entity);

        // Fan-out runs inside the registry's per-entity critical section so
        // subscribers observe events in acceptance order.
        let result = self.registry.submit_with(event, |accepted| {
            self.dispatch
                .publish(&entity, &ServerMessage::Event(accepted.clone()));
        });

        match result.outcome {
            Submission::Accepted {
                accepted,
                resolution,
            } => {
                if let Some(resolution) = resolution {
                    tracing::info!(
                        entity = %accepted.event.entity,
                        sequence = accepted.sequence,
                        resolution = ?resolution,
                        "conflict auto-resolved"
                    );
                }
                // The fan-out echo is the producer's acknowledgment. A
                // producer that is not subscribed (or a redelivery, which
                // skips fan-out) gets a direct echo instead.
                if result.duplicate || !subscribed {
                    self.dispatch
                        .send_to(connection_id, ServerMessage::Event(accepted))?;
                }
                Ok(())
            }
            Submission::Dropped(report) | Submission::Rejected(report) => self
                .dispatch
                .send_to(connection_id, ServerMessage::Conflict(report)),
        }
    }

    /// Sends a final error message (best effort) and closes the connection.
    fn fail_connection(&self, connection_id: Uuid, reason: &str) {
        let _ = self.dispatch.send_to(
            connection_id,
            ServerMessage::Error {
                message: reason.into(),
            },
        );
        self.dispatch.disconnect(connection_id);
    }
}
