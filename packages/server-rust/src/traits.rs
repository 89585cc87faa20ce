//! Interfaces to the collaborators the control plane consumes but does not
//! own: the host proxy environment, the transport, the script evaluator,
//! the seen-before store, and the notification/file sinks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Player / server handles
// ---------------------------------------------------------------------------

/// A player connected somewhere on the network, as the host reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    pub name: String,
    pub id: Uuid,
    /// The backend server the player is currently on, if known.
    pub server: Option<String>,
}

impl PlayerRef {
    /// Convenience constructor for a player with a known backend.
    #[must_use]
    pub fn new(name: impl Into<String>, id: Uuid, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            server: Some(server.into()),
        }
    }
}

/// One backend server connection, as the transport reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRef {
    pub name: String,
    /// Connected player count; packets are never forwarded to empty servers.
    pub player_count: usize,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The duplex byte-message channel to backend servers.
///
/// Inbound bytes are delivered by the host to
/// [`ControlPlane::handle_packet`](crate::context::ControlPlane::handle_packet);
/// this trait covers the outbound half plus connection discovery.
pub trait PacketSink: Send + Sync {
    /// Hands bytes to the named backend connection. Fire-and-forget;
    /// delivery is not guaranteed.
    fn send(&self, server: &str, bytes: &[u8]);

    /// The currently registered backend connections.
    fn servers(&self) -> Vec<ServerRef>;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// The host proxy environment: roster, capabilities, and per-player
/// primitives the rule engine's actions need.
pub trait Gateway: Send + Sync {
    /// Every player connected through this node.
    fn online_players(&self) -> Vec<PlayerRef>;

    /// Resolves a player by unique id, if still connected.
    fn player_by_id(&self, id: Uuid) -> Option<PlayerRef>;

    /// The capability predicate: does `player` hold `name`?
    fn has_capability(&self, player: &PlayerRef, name: &str) -> bool;

    /// Sends a chat line to one player.
    fn send_chat(&self, player: &PlayerRef, text: &str);

    /// Disconnects a player with a reason.
    fn disconnect(&self, player: &PlayerRef, reason: &str);

    /// Runs a command as the given player.
    fn run_player_command(&self, player: &PlayerRef, command: &str);

    /// Runs a command on the node's own console.
    fn run_console_command(&self, command: &str);
}

// ---------------------------------------------------------------------------
// ScriptEvaluator
// ---------------------------------------------------------------------------

/// Pluggable evaluator for the free-form boolean scripts rules may declare.
pub trait ScriptEvaluator: Send + Sync {
    /// Evaluates `expr` with the given variable bindings.
    ///
    /// `Ok(None)` means the script produced no boolean opinion and the
    /// predicate is treated as passing.
    ///
    /// # Errors
    ///
    /// An `Err` marks the evaluation itself as broken (syntax error,
    /// runtime crash); the engine logs it and skips the offending rule only.
    fn evaluate(
        &self,
        expr: &str,
        bindings: &HashMap<String, String>,
    ) -> anyhow::Result<Option<bool>>;
}

/// Evaluator that has no opinion about anything.
#[derive(Debug, Default)]
pub struct NullScriptEvaluator;

impl ScriptEvaluator for NullScriptEvaluator {
    fn evaluate(
        &self,
        _expr: &str,
        _bindings: &HashMap<String, String>,
    ) -> anyhow::Result<Option<bool>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// SeenStore
// ---------------------------------------------------------------------------

/// The tiny key-set answering "has this player connected before?".
/// Persistence is the embedder's concern.
pub trait SeenStore: Send + Sync {
    fn contains(&self, id: &Uuid) -> bool;
    fn record(&self, id: Uuid);
}

/// Process-local [`SeenStore`], also the test double.
#[derive(Debug, Default)]
pub struct InMemorySeenStore {
    seen: RwLock<HashSet<Uuid>>,
}

impl SeenStore for InMemorySeenStore {
    fn contains(&self, id: &Uuid) -> bool {
        self.seen.read().contains(id)
    }

    fn record(&self, id: Uuid) {
        self.seen.write().insert(id);
    }
}

// ---------------------------------------------------------------------------
// NotificationSink
// ---------------------------------------------------------------------------

/// External notification channel for `then notify` actions. Best-effort:
/// failures are logged by the engine and never fail the event.
pub trait NotificationSink: Send + Sync {
    /// # Errors
    ///
    /// Delivery problems; the engine downgrades them to a warning.
    fn notify(&self, channel: &str, message: &str) -> anyhow::Result<()>;
}

/// Sink that drops every notification.
#[derive(Debug, Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify(&self, _channel: &str, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileLog
// ---------------------------------------------------------------------------

/// External file sink for `then write` actions.
pub trait FileLog: Send + Sync {
    fn append(&self, file: &str, line: &str);
}

/// File log that discards every line.
#[derive(Debug, Default)]
pub struct NullFileLog;

impl FileLog for NullFileLog {
    fn append(&self, _file: &str, _line: &str) {}
}

// ---------------------------------------------------------------------------
// ExternalServices
// ---------------------------------------------------------------------------

/// The full bundle of injected collaborators, wired once by the process
/// entry point and shared by every component.
#[derive(Clone)]
pub struct ExternalServices {
    pub gateway: Arc<dyn Gateway>,
    pub sink: Arc<dyn PacketSink>,
    pub scripts: Arc<dyn ScriptEvaluator>,
    pub seen: Arc<dyn SeenStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub file_log: Arc<dyn FileLog>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
