//! Lifecycle transition tracking and pending announcements.
//!
//! Join and switch announcements cannot fire the moment the host reports
//! them: the backend server must first report the player's enriched
//! attributes (vanish, nick, permissions) through a confirmation packet.
//! Until then the announcement is parked here, where a newer event for the
//! same player overwrites it. Quits carry no pending state and run
//! immediately.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use fleetlink_core::LifecycleKind;

use crate::config::Settings;
use crate::engine::RuleEngine;
use crate::replica::StateReplica;
use crate::traits::{Gateway, PlayerRef, SeenStore};

/// Capability letting a vanished player's pending announcement through.
pub const REACH_BYPASS: &str = "fleetlink.bypass.reach";

// ---------------------------------------------------------------------------
// PendingMessage
// ---------------------------------------------------------------------------

/// One queued announcement awaiting backend confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub kind: LifecycleKind,
    pub variables: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// LifecycleTracker
// ---------------------------------------------------------------------------

/// Turns host connection callbacks into lifecycle events for the engine.
pub struct LifecycleTracker {
    /// Pending announcement per player; a newer event overwrites, a
    /// disconnect removes.
    pending: DashMap<Uuid, PendingMessage>,
    /// Last backend each player was seen on, to tell joins from switches.
    last_server: DashMap<Uuid, String>,
    engine: Arc<RuleEngine>,
    replica: Arc<StateReplica>,
    gateway: Arc<dyn Gateway>,
    seen: Arc<dyn SeenStore>,
    settings: Arc<Settings>,
}

impl LifecycleTracker {
    #[must_use]
    pub fn new(
        engine: Arc<RuleEngine>,
        replica: Arc<StateReplica>,
        gateway: Arc<dyn Gateway>,
        seen: Arc<dyn SeenStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            last_server: DashMap::new(),
            engine,
            replica,
            gateway,
            seen,
            settings,
        }
    }

    /// Host callback: `player` finished connecting to `server`.
    ///
    /// First sight of the player queues a JOIN announcement; any later
    /// sight queues a SWITCH, overwriting whatever was pending.
    pub fn on_server_connected(&self, player: &PlayerRef, server: &str) {
        let previous = self
            .last_server
            .insert(player.id, server.to_string());

        match previous {
            None => {
                let to_server = self.settings.server_alias(server);
                if self.settings.is_ignored_server(server)
                    || self.settings.is_ignored_server(&to_server)
                {
                    return;
                }
                debug!(player = %player.name, server = %to_server, "join detected, waiting for backend data");

                let mut variables = HashMap::new();
                variables.insert("server".to_string(), to_server);
                self.pending.insert(
                    player.id,
                    PendingMessage {
                        kind: LifecycleKind::Join,
                        variables,
                    },
                );
            }
            Some(previous) => {
                let from_server = self.settings.server_alias(&previous);
                if self.settings.is_ignored_server(&from_server) {
                    return;
                }
                debug!(player = %player.name, from = %from_server, "switch detected, waiting for backend data");

                let mut variables = HashMap::new();
                variables.insert("from_server".to_string(), from_server);
                variables.insert(
                    "to_server".to_string(),
                    self.settings.server_alias(server),
                );
                self.pending.insert(
                    player.id,
                    PendingMessage {
                        kind: LifecycleKind::Switch,
                        variables,
                    },
                );
            }
        }
    }

    /// Host callback: `player` disconnected from the network.
    ///
    /// Unconfirmed pending announcements are abandoned; the quit itself is
    /// announced immediately (vanished players leave silently) and the
    /// player is recorded as seen.
    pub fn on_disconnect(&self, player: &PlayerRef) {
        self.pending.remove(&player.id);

        let Some((_, server)) = self.last_server.remove(&player.id) else {
            return;
        };
        if self.settings.is_ignored_server(&server) {
            return;
        }
        let from_server = self.settings.server_alias(&server);
        if self.settings.is_ignored_server(&from_server) {
            return;
        }

        let Some(record) = self.replica.snapshot(&player.name) else {
            return;
        };
        if !record.vanished {
            let mut variables = HashMap::new();
            variables.insert("server".to_string(), from_server);
            self.engine
                .broadcast(LifecycleKind::Quit, player, variables);

            if !self.seen.contains(&player.id) {
                self.seen.record(player.id);
            }
        }
    }

    /// Releases the pending announcement after the backend confirmed the
    /// player's enriched attributes.
    ///
    /// Vanished players stay silent unless they hold [`REACH_BYPASS`].
    pub fn release_pending(&self, player: &PlayerRef) {
        let Some((_, pending)) = self.pending.remove(&player.id) else {
            return;
        };

        let vanished = self
            .replica
            .snapshot(&player.name)
            .is_some_and(|record| record.vanished);
        if vanished && !self.gateway.has_capability(player, REACH_BYPASS) {
            debug!(player = %player.name, "vanished player's announcement suppressed");
            return;
        }

        self.engine
            .broadcast(pending.kind, player, pending.variables);
    }

    /// The pending announcement for a player, if any. Exposed for
    /// inspection in tests and diagnostics.
    #[must_use]
    pub fn pending_for(&self, id: Uuid) -> Option<PendingMessage> {
        self.pending.get(&id).map(|entry| entry.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
