//! # Armada Sync Protocol
//!
//! Event model, conflict types, and wire messages for the Armada sync core.
//!
//! This crate provides:
//! - `SyncEvent`: the atomic unit of change, with construction-time
//!   validation of operation/entity/payload combinations
//! - `EntityPayload`: a closed set of per-entity payload variants with
//!   field-level merge support
//! - `ConflictReport`: classification and resolution of divergent versions
//! - `ClientMessage` / `ServerMessage`: the `{type, data}` wire messages
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod event;
mod messages;
mod payload;

pub use conflict::{ConflictKind, ConflictReport, Resolution};
pub use entity::{EntityKind, EntityRef};
pub use event::{unix_millis_now, OperationKind, SyncEvent, ValidationError, ValidationResult};
pub use messages::{AcceptedEvent, ClientMessage, ServerMessage};
pub use payload::{
    EntityPayload, PluginLifecycle, Presence, ServerStatus, SessionAction,
};
