//! Entity identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of entity tracked by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A hosted game server.
    Server,
    /// A player community.
    Community,
    /// An installed plugin.
    Plugin,
    /// A platform user.
    User,
    /// A live player session on a server.
    PlayerSession,
}

impl EntityKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Server => "server",
            EntityKind::Community => "community",
            EntityKind::Plugin => "plugin",
            EntityKind::User => "user",
            EntityKind::PlayerSession => "player_session",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a single entity.
///
/// The `(kind, id)` pair is the ordering key for the sync core: events for
/// the same `EntityRef` are applied in strictly increasing sequence order,
/// events for different refs are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity identifier, assigned by the CRUD layer.
    pub id: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a server reference.
    pub fn server(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Server, id)
    }

    /// Shorthand for a community reference.
    pub fn community(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Community, id)
    }

    /// Shorthand for a plugin reference.
    pub fn plugin(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Plugin, id)
    }

    /// Shorthand for a user reference.
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    /// Shorthand for a player session reference.
    pub fn player_session(id: impl Into<String>) -> Self {
        Self::new(EntityKind::PlayerSession, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
