//! # Armada Sync Engine
//!
//! Client-side sync engine for the Armada platform.
//!
//! This crate provides:
//! - `Outbox`: durable in-process queue of unacknowledged local events,
//!   with per-entity ordering and retry with exponential backoff
//! - `ReconciliationStore`: the client-local entity projection and a
//!   bounded activity feed
//! - `ConnectionMonitor`: an explicit reconnect state machine with a
//!   cancellable backoff timer
//! - `SyncEngine`: the facade wiring the above to a [`HubTransport`]
//!
//! ## Architecture
//!
//! The engine is deadline-driven and transport-agnostic: the host owns the
//! actual socket, feeds every received [`armada_sync_protocol::ServerMessage`]
//! into `SyncEngine::handle_incoming`, and calls `drain_outbox` /
//! `poll_reconnect` on a timer. The hub's fan-out echo of an accepted event
//! doubles as the outbox acknowledgment, so there is no separate ack
//! channel.
//!
//! ## Key invariants
//!
//! - Events for one entity are delivered in enqueue order, one in flight
//!   at a time; different entities deliver independently
//! - A dead outbox entry surfaces exactly one delivery failure and is
//!   never retried automatically again
//! - Reconnection resubscribes and resyncs full snapshots rather than
//!   replaying a potentially gapped event history

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod engine;
mod error;
mod outbox;
mod store;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connection::{ConnectionMonitor, ConnectionState, ReconnectAction};
pub use engine::{EngineStats, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use outbox::{DrainOutcome, Outbox, OutboxEntry, OutboxState};
pub use store::{ActivityEntry, EntityRecord, ReconciliationStore};
pub use transport::{HubTransport, MockTransport};
