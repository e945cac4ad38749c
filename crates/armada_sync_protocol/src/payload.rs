//! Per-entity payload variants.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Lifecycle status of a game server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Process is not running.
    Offline,
    /// Process is booting.
    Starting,
    /// Process is serving players.
    Running,
    /// Process is shutting down.
    Stopping,
    /// Process exited abnormally.
    Crashed,
}

/// Install lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginLifecycle {
    /// Download/install in progress.
    Installing,
    /// Installed and enabled.
    Active,
    /// Installed but disabled.
    Disabled,
    /// Install or load failed.
    Failed,
    /// Uninstalled.
    Removed,
}

/// Presence state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Actively connected.
    Online,
    /// Connected but idle.
    Away,
    /// Not connected.
    Offline,
}

/// Action taken within a player session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    /// Player joined the server.
    Joined,
    /// Player left the server.
    Left,
    /// Player was kicked by an operator.
    Kicked,
    /// Session expired without a clean leave.
    TimedOut,
}

/// Operation-specific payload data, tagged by entity kind.
///
/// Every field is an optional delta: a populated field is part of the
/// change, an absent field is untouched. `field_keys` and `merge_from`
/// operate on populated fields only, which is what the conflict detector's
/// disjointness test and field-level merge are built on.
///
/// Configuration and settings maps merge at top-level key granularity:
/// `configuration.max_players` and `configuration.motd` are distinct
/// fields, but structure nested below a key is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityPayload {
    /// Game server deltas.
    Server {
        /// Process status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ServerStatus>,
        /// CPU usage percentage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cpu_usage: Option<f64>,
        /// Memory usage percentage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_usage: Option<f64>,
        /// Connected player count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_count: Option<u32>,
        /// Configuration deltas, keyed by setting name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        configuration: Option<Map<String, Value>>,
    },
    /// Community deltas.
    Community {
        /// User added to the member list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_added: Option<String>,
        /// User removed from the member list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_removed: Option<String>,
        /// Settings deltas, keyed by setting name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<Map<String, Value>>,
    },
    /// Plugin deltas.
    Plugin {
        /// Install lifecycle state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lifecycle: Option<PluginLifecycle>,
        /// Installed version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        /// Last load/install error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Server this plugin is installed on.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
    },
    /// User deltas.
    User {
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        /// Presence state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presence: Option<Presence>,
    },
    /// Player session deltas.
    PlayerSession {
        /// Server the session belongs to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
        /// Player name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
        /// Session action.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<SessionAction>,
    },
}

impl EntityPayload {
    /// Creates an empty payload of the given kind (no fields populated).
    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Server => EntityPayload::Server {
                status: None,
                cpu_usage: None,
                memory_usage: None,
                player_count: None,
                configuration: None,
            },
            EntityKind::Community => EntityPayload::Community {
                member_added: None,
                member_removed: None,
                settings: None,
            },
            EntityKind::Plugin => EntityPayload::Plugin {
                lifecycle: None,
                version: None,
                error: None,
                server_id: None,
            },
            EntityKind::User => EntityPayload::User {
                display_name: None,
                presence: None,
            },
            EntityKind::PlayerSession => EntityPayload::PlayerSession {
                server_id: None,
                player_name: None,
                action: None,
            },
        }
    }

    /// Returns the entity kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Server { .. } => EntityKind::Server,
            EntityPayload::Community { .. } => EntityKind::Community,
            EntityPayload::Plugin { .. } => EntityKind::Plugin,
            EntityPayload::User { .. } => EntityKind::User,
            EntityPayload::PlayerSession { .. } => EntityKind::PlayerSession,
        }
    }

    /// Returns the server a payload depends on, if it names one.
    ///
    /// Plugin installs and player sessions reference the server they live
    /// on; the conflict detector rejects events whose referenced server no
    /// longer exists.
    pub fn server_dependency(&self) -> Option<&str> {
        match self {
            EntityPayload::Plugin { server_id, .. }
            | EntityPayload::PlayerSession { server_id, .. } => server_id.as_deref(),
            _ => None,
        }
    }

    /// Returns the names of populated fields.
    ///
    /// Map-valued fields (configuration, settings) contribute one key per
    /// top-level map entry, e.g. `configuration.max_players`.
    pub fn field_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();

        fn add(keys: &mut BTreeSet<String>, name: &str, populated: bool) {
            if populated {
                keys.insert(name.to_string());
            }
        }

        fn add_map(keys: &mut BTreeSet<String>, name: &str, map: &Option<Map<String, Value>>) {
            if let Some(map) = map {
                for key in map.keys() {
                    keys.insert(format!("{name}.{key}"));
                }
            }
        }

        match self {
            EntityPayload::Server {
                status,
                cpu_usage,
                memory_usage,
                player_count,
                configuration,
            } => {
                add(&mut keys, "status", status.is_some());
                add(&mut keys, "cpu_usage", cpu_usage.is_some());
                add(&mut keys, "memory_usage", memory_usage.is_some());
                add(&mut keys, "player_count", player_count.is_some());
                add_map(&mut keys, "configuration", configuration);
            }
            EntityPayload::Community {
                member_added,
                member_removed,
                settings,
            } => {
                add(&mut keys, "member_added", member_added.is_some());
                add(&mut keys, "member_removed", member_removed.is_some());
                add_map(&mut keys, "settings", settings);
            }
            EntityPayload::Plugin {
                lifecycle,
                version,
                error,
                server_id,
            } => {
                add(&mut keys, "lifecycle", lifecycle.is_some());
                add(&mut keys, "version", version.is_some());
                add(&mut keys, "error", error.is_some());
                add(&mut keys, "server_id", server_id.is_some());
            }
            EntityPayload::User {
                display_name,
                presence,
            } => {
                add(&mut keys, "display_name", display_name.is_some());
                add(&mut keys, "presence", presence.is_some());
            }
            EntityPayload::PlayerSession {
                server_id,
                player_name,
                action,
            } => {
                add(&mut keys, "server_id", server_id.is_some());
                add(&mut keys, "player_name", player_name.is_some());
                add(&mut keys, "action", action.is_some());
            }
        }

        keys
    }

    /// Returns true if this payload shares no populated fields with `keys`.
    pub fn is_disjoint_from(&self, keys: &BTreeSet<String>) -> bool {
        self.field_keys().is_disjoint(keys)
    }

    /// Merges the populated fields of `other` into `self`.
    ///
    /// Populated fields of `other` overwrite; map-valued fields merge per
    /// top-level key. If the variants differ (which validated events cannot
    /// produce), `self` is replaced wholesale.
    pub fn merge_from(&mut self, other: &EntityPayload) {
        fn merge_opt<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
            if let Some(value) = source {
                *target = Some(value.clone());
            }
        }

        fn merge_map(target: &mut Option<Map<String, Value>>, source: &Option<Map<String, Value>>) {
            if let Some(source) = source {
                let map = target.get_or_insert_with(Map::new);
                for (key, value) in source {
                    map.insert(key.clone(), value.clone());
                }
            }
        }

        match (self, other) {
            (
                EntityPayload::Server {
                    status,
                    cpu_usage,
                    memory_usage,
                    player_count,
                    configuration,
                },
                EntityPayload::Server {
                    status: o_status,
                    cpu_usage: o_cpu,
                    memory_usage: o_mem,
                    player_count: o_players,
                    configuration: o_config,
                },
            ) => {
                merge_opt(status, o_status);
                merge_opt(cpu_usage, o_cpu);
                merge_opt(memory_usage, o_mem);
                merge_opt(player_count, o_players);
                merge_map(configuration, o_config);
            }
            (
                EntityPayload::Community {
                    member_added,
                    member_removed,
                    settings,
                },
                EntityPayload::Community {
                    member_added: o_added,
                    member_removed: o_removed,
                    settings: o_settings,
                },
            ) => {
                merge_opt(member_added, o_added);
                merge_opt(member_removed, o_removed);
                merge_map(settings, o_settings);
            }
            (
                EntityPayload::Plugin {
                    lifecycle,
                    version,
                    error,
                    server_id,
                },
                EntityPayload::Plugin {
                    lifecycle: o_lifecycle,
                    version: o_version,
                    error: o_error,
                    server_id: o_server,
                },
            ) => {
                merge_opt(lifecycle, o_lifecycle);
                merge_opt(version, o_version);
                merge_opt(error, o_error);
                merge_opt(server_id, o_server);
            }
            (
                EntityPayload::User {
                    display_name,
                    presence,
                },
                EntityPayload::User {
                    display_name: o_name,
                    presence: o_presence,
                },
            ) => {
                merge_opt(display_name, o_name);
                merge_opt(presence, o_presence);
            }
            (
                EntityPayload::PlayerSession {
                    server_id,
                    player_name,
                    action,
                },
                EntityPayload::PlayerSession {
                    server_id: o_server,
                    player_name: o_name,
                    action: o_action,
                },
            ) => {
                merge_opt(server_id, o_server);
                merge_opt(player_name, o_name);
                merge_opt(action, o_action);
            }
            (this, other) => *this = other.clone(),
        }
    }

    /// Returns a short human-readable summary of the populated fields.
    pub fn summary(&self) -> String {
        match self {
            EntityPayload::Server {
                status,
                cpu_usage,
                player_count,
                configuration,
                ..
            } => {
                if let Some(status) = status {
                    return format!("status {}", status_name(*status));
                }
                if let Some(count) = player_count {
                    return format!("{count} players online");
                }
                if let Some(cpu) = cpu_usage {
                    return format!("cpu at {cpu:.0}%");
                }
                if configuration.is_some() {
                    return "configuration changed".into();
                }
                "updated".into()
            }
            EntityPayload::Community {
                member_added,
                member_removed,
                settings,
            } => {
                if let Some(user) = member_added {
                    return format!("{user} joined");
                }
                if let Some(user) = member_removed {
                    return format!("{user} left");
                }
                if settings.is_some() {
                    return "settings changed".into();
                }
                "updated".into()
            }
            EntityPayload::Plugin {
                lifecycle, error, ..
            } => {
                if let Some(message) = error {
                    return format!("error: {message}");
                }
                match lifecycle {
                    Some(PluginLifecycle::Installing) => "installing".into(),
                    Some(PluginLifecycle::Active) => "enabled".into(),
                    Some(PluginLifecycle::Disabled) => "disabled".into(),
                    Some(PluginLifecycle::Failed) => "failed".into(),
                    Some(PluginLifecycle::Removed) => "removed".into(),
                    None => "updated".into(),
                }
            }
            EntityPayload::User { presence, .. } => match presence {
                Some(Presence::Online) => "online".into(),
                Some(Presence::Away) => "away".into(),
                Some(Presence::Offline) => "offline".into(),
                None => "updated".into(),
            },
            EntityPayload::PlayerSession {
                player_name, action, ..
            } => {
                let name = player_name.as_deref().unwrap_or("player");
                match action {
                    Some(SessionAction::Joined) => format!("{name} joined"),
                    Some(SessionAction::Left) => format!("{name} left"),
                    Some(SessionAction::Kicked) => format!("{name} was kicked"),
                    Some(SessionAction::TimedOut) => format!("{name} timed out"),
                    None => format!("{name} session updated"),
                }
            }
        }
    }
}

fn status_name(status: ServerStatus) -> &'static str {
    match status {
        ServerStatus::Offline => "offline",
        ServerStatus::Starting => "starting",
        ServerStatus::Running => "running",
        ServerStatus::Stopping => "stopping",
        ServerStatus::Crashed => "crashed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_payload(cpu: Option<f64>, players: Option<u32>) -> EntityPayload {
        EntityPayload::Server {
            status: None,
            cpu_usage: cpu,
            memory_usage: None,
            player_count: players,
            configuration: None,
        }
    }

    #[test]
    fn field_keys_only_populated() {
        let payload = server_payload(Some(80.0), None);
        let keys = payload.field_keys();

        assert!(keys.contains("cpu_usage"));
        assert!(!keys.contains("player_count"));
        assert!(!keys.contains("status"));
    }

    #[test]
    fn configuration_keys_are_per_setting() {
        let mut config = Map::new();
        config.insert("max_players".into(), json!(32));
        config.insert("motd".into(), json!("welcome"));

        let payload = EntityPayload::Server {
            status: None,
            cpu_usage: None,
            memory_usage: None,
            player_count: None,
            configuration: Some(config),
        };

        let keys = payload.field_keys();
        assert!(keys.contains("configuration.max_players"));
        assert!(keys.contains("configuration.motd"));
        assert!(!keys.contains("configuration"));
    }

    #[test]
    fn disjoint_payloads() {
        let cpu = server_payload(Some(80.0), None);
        let players = server_payload(None, Some(5));

        assert!(cpu.is_disjoint_from(&players.field_keys()));
        assert!(!cpu.is_disjoint_from(&cpu.field_keys()));
    }

    #[test]
    fn merge_overwrites_populated_fields() {
        let mut snapshot = server_payload(Some(10.0), Some(3));
        let delta = server_payload(Some(80.0), None);

        snapshot.merge_from(&delta);

        match snapshot {
            EntityPayload::Server {
                cpu_usage,
                player_count,
                ..
            } => {
                assert_eq!(cpu_usage, Some(80.0));
                assert_eq!(player_count, Some(3));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn merge_configuration_per_key() {
        let mut base_config = Map::new();
        base_config.insert("max_players".into(), json!(16));
        base_config.insert("motd".into(), json!("old"));

        let mut snapshot = EntityPayload::Server {
            status: None,
            cpu_usage: None,
            memory_usage: None,
            player_count: None,
            configuration: Some(base_config),
        };

        let mut delta_config = Map::new();
        delta_config.insert("motd".into(), json!("new"));

        snapshot.merge_from(&EntityPayload::Server {
            status: None,
            cpu_usage: None,
            memory_usage: None,
            player_count: None,
            configuration: Some(delta_config),
        });

        match snapshot {
            EntityPayload::Server { configuration, .. } => {
                let config = configuration.unwrap();
                assert_eq!(config["max_players"], json!(16));
                assert_eq!(config["motd"], json!("new"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn server_dependency_extraction() {
        let plugin = EntityPayload::Plugin {
            lifecycle: Some(PluginLifecycle::Installing),
            version: None,
            error: None,
            server_id: Some("srv-1".into()),
        };
        assert_eq!(plugin.server_dependency(), Some("srv-1"));

        let server = server_payload(None, None);
        assert_eq!(server.server_dependency(), None);
    }

    #[test]
    fn serde_tags_by_entity_type() {
        let payload = server_payload(Some(50.0), None);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["entity_type"], json!("server"));
        assert_eq!(value["cpu_usage"], json!(50.0));
        assert!(value.get("player_count").is_none());
    }

    #[test]
    fn session_summary() {
        let payload = EntityPayload::PlayerSession {
            server_id: Some("srv-1".into()),
            player_name: Some("steve".into()),
            action: Some(SessionAction::Joined),
        };
        assert_eq!(payload.summary(), "steve joined");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_server_payload() -> impl Strategy<Value = EntityPayload> {
            (
                proptest::option::of(0.0f64..100.0),
                proptest::option::of(0.0f64..100.0),
                proptest::option::of(0u32..1000),
            )
                .prop_map(|(cpu, mem, players)| EntityPayload::Server {
                    status: None,
                    cpu_usage: cpu,
                    memory_usage: mem,
                    player_count: players,
                    configuration: None,
                })
        }

        proptest! {
            #[test]
            fn merge_preserves_delta_fields(
                base in arb_server_payload(),
                delta in arb_server_payload(),
            ) {
                let mut merged = base;
                merged.merge_from(&delta);

                // Every populated field of the delta survives the merge.
                prop_assert!(delta.field_keys().is_subset(&merged.field_keys()));
            }

            #[test]
            fn json_roundtrip(payload in arb_server_payload()) {
                let json = serde_json::to_string(&payload).unwrap();
                let decoded: EntityPayload = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(decoded, payload);
            }
        }
    }
}
