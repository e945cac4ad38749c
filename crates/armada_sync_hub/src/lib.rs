//! # Armada Sync Hub
//!
//! Authoritative conflict detection and real-time fan-out for the Armada
//! platform.
//!
//! This crate provides:
//! - `EntityRegistry`: the conflict detector, sole owner of per-entity
//!   versions, serialized per entity and parallel across entities
//! - `DispatchHub`: authenticated connections, per-entity subscription
//!   sets, bounded outbound queues with overflow-drop backpressure
//! - `TokenValidator`: HMAC-SHA256 origin tokens
//! - `SyncHub`: the facade dispatching the `{type, data}` wire messages
//!
//! # Architecture
//!
//! Every mutation arrives as a `SyncEvent` carrying the base version its
//! producer observed. The registry compares it against the authoritative
//! sequence: matching versions apply on the fast path; stale versions are
//! classified by field disjointness and either merged, dropped in favor of
//! the authoritative version, or (for ground-truth status changes)
//! accepted as overrides. Accepted events fan out to subscribers inside
//! the per-entity critical section, so delivery order always matches
//! acceptance order. Producer timestamps are advisory; the server-assigned
//! sequence is the sole ordering authority.
//!
//! # Authentication
//!
//! Connections must complete a token handshake before any subscription or
//! event traffic; anything else is answered with an error and a close.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod hub;
mod registry;
mod server;

pub use auth::TokenValidator;
pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::DispatchHub;
pub use registry::{EntityRegistry, EntityVersion, Submission, SubmitResult};
pub use server::SyncHub;
