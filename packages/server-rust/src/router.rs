//! Classification and forwarding of inbound wire messages.
//!
//! Replication kinds are absorbed locally; everything else is forwarded
//! raw, under a policy that skips empty servers, avoids echoing back to the
//! origin unless the kind is forced, and honors cluster partitions. A bad
//! message is logged and dropped without disturbing the ones behind it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use fleetlink_core::{IncomingMessage, PacketKind, SyncKind, WireError};

use crate::config::Settings;
use crate::lifecycle::LifecycleTracker;
use crate::replica::StateReplica;
use crate::scheduler::DeltaBuffer;
use crate::traits::{Gateway, PacketSink};

/// Target name in a [`PacketKind::ForwardCommand`] that means "execute on
/// this node's console" rather than "forward".
pub const LOCAL_NODE_TARGET: &str = "proxy";

// ---------------------------------------------------------------------------
// RouterError
// ---------------------------------------------------------------------------

/// Why one inbound message was dropped.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unknown sync kind {0:?}")]
    UnknownSyncKind(String),

    #[error("bad roster entry for {name}: {raw:?}")]
    BadRosterEntry { name: String, raw: String },
}

// ---------------------------------------------------------------------------
// PacketRouter
// ---------------------------------------------------------------------------

/// Per-message state machine over the inbound side of the transport.
pub struct PacketRouter {
    replica: Arc<StateReplica>,
    buffer: Arc<DeltaBuffer>,
    lifecycle: Arc<LifecycleTracker>,
    gateway: Arc<dyn Gateway>,
    sink: Arc<dyn PacketSink>,
    settings: Arc<Settings>,
}

impl PacketRouter {
    #[must_use]
    pub fn new(
        replica: Arc<StateReplica>,
        buffer: Arc<DeltaBuffer>,
        lifecycle: Arc<LifecycleTracker>,
        gateway: Arc<dyn Gateway>,
        sink: Arc<dyn PacketSink>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            replica,
            buffer,
            lifecycle,
            gateway,
            sink,
            settings,
        }
    }

    /// Handles one inbound message from the named backend connection.
    /// Never panics or propagates: a failed message is logged with its
    /// server identity and discarded.
    pub fn handle(&self, origin_server: &str, bytes: &[u8]) {
        if let Err(err) = self.dispatch(origin_server, bytes) {
            error!(server = origin_server, %err, "dropping inbound packet");
        }
    }

    fn dispatch(&self, origin_server: &str, bytes: &[u8]) -> Result<(), RouterError> {
        let mut message = IncomingMessage::decode(Bytes::copy_from_slice(bytes))?;
        debug!(server = origin_server, kind = %message.kind(), "inbound packet");

        match message.kind() {
            PacketKind::ClusterHeader => {
                let roster = parse_roster(message.read_map()?)?;
                self.replica.upsert_roster(message.origin(), roster);
            }
            PacketKind::ClusterData => {
                let kind_name = message.read_str()?;
                let kind = SyncKind::from_name(&kind_name)
                    .ok_or(RouterError::UnknownSyncKind(kind_name))?;
                self.buffer.merge(kind, message.read_map()?);
            }
            PacketKind::ForwardCommand => {
                let target = message.read_str()?;
                let alias = self.settings.server_alias(origin_server);
                let command = message.read_str()?.replace("{server_name}", &alias);

                if target == LOCAL_NODE_TARGET {
                    self.gateway.run_console_command(&command);
                } else {
                    self.forward(origin_server, &message, false);
                }
            }
            PacketKind::ConfirmPlayerReady => {
                let id = message.read_uuid()?;
                let line = message.read_str()?;

                // Absent player means they disconnected while the backend
                // was resolving; nothing to confirm anymore.
                if let Some(player) = self.gateway.player_by_id(id) {
                    self.replica.apply_single(&player.name, id, &line);
                    self.lifecycle.release_pending(&player);
                }
            }
            kind => self.forward(origin_server, &message, kind.is_forced()),
        }

        Ok(())
    }

    /// Forwards raw bytes to peer servers.
    ///
    /// Policy: empty servers never receive anything; the origin server is
    /// skipped unless the kind forces delivery back to it; with clustering
    /// enabled, traffic stays inside the origin's cluster.
    fn forward(&self, origin_server: &str, message: &IncomingMessage, force_origin: bool) {
        let origin_cluster = self.settings.cluster_of(origin_server);

        for server in self.sink.servers() {
            if server.player_count == 0 {
                debug!(server = %server.name, "not forwarding to empty server");
                continue;
            }
            if !force_origin && server.name == origin_server {
                debug!(server = %server.name, "not forwarding back to origin");
                continue;
            }
            if self.settings.clusters.enabled
                && self.settings.cluster_of(&server.name) != origin_cluster
            {
                debug!(server = %server.name, "not forwarding outside origin cluster");
                continue;
            }

            self.sink.send(&server.name, message.raw());
        }
    }
}

fn parse_roster(raw: HashMap<String, String>) -> Result<HashMap<String, Uuid>, RouterError> {
    let mut roster = HashMap::with_capacity(raw.len());
    for (name, id) in raw {
        let id = Uuid::parse_str(&id).map_err(|_| RouterError::BadRosterEntry {
            name: name.clone(),
            raw: id.clone(),
        })?;
        roster.insert(name, id);
    }
    Ok(roster)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
