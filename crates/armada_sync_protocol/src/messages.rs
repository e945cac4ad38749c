//! Wire messages exchanged between clients and the dispatch hub.
//!
//! All messages share the `{"type": ..., "data": ...}` envelope. The
//! transport is not specified here; anything that can carry JSON text
//! frames (WebSocket, IPC pipe, in-memory channel) works.

use crate::conflict::ConflictReport;
use crate::entity::EntityRef;
use crate::event::SyncEvent;
use crate::payload::EntityPayload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent by a client to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authentication handshake; must precede all other traffic.
    Auth {
        /// Base64 origin token.
        token: String,
    },
    /// Subscribe to an entity's event stream. Idempotent.
    Subscribe {
        /// Target entity.
        entity: EntityRef,
    },
    /// Unsubscribe from an entity's event stream. Idempotent.
    Unsubscribe {
        /// Target entity.
        entity: EntityRef,
    },
    /// Submit a locally originated event.
    Event(SyncEvent),
    /// Request a full authoritative snapshot (after reconnect).
    Resync {
        /// Target entity.
        entity: EntityRef,
    },
}

/// An event accepted by the conflict detector, with its assigned sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedEvent {
    /// Server-assigned per-entity sequence number.
    pub sequence: u64,
    /// The accepted (possibly merged) event.
    pub event: SyncEvent,
}

/// Messages pushed by the hub to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication succeeded.
    AuthAck {
        /// The origin identity bound to this connection.
        origin_id: Uuid,
    },
    /// Fan-out of an accepted event to subscribers (originator included).
    Event(AcceptedEvent),
    /// A submitted event conflicted; carries both snapshots.
    Conflict(ConflictReport),
    /// Full authoritative snapshot in response to a resync request.
    Snapshot {
        /// The entity.
        entity: EntityRef,
        /// Authoritative sequence at snapshot time.
        sequence: u64,
        /// Materialized payload.
        payload: EntityPayload,
    },
    /// Fatal or protocol-level error.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ClientMessage {
    /// Encodes to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes from a JSON text frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    /// Encodes to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes from a JSON text frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
