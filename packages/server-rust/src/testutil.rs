//! Shared test doubles for the external collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::traits::{
    ExternalServices, FileLog, Gateway, InMemorySeenStore, NotificationSink, PacketSink,
    PlayerRef, ScriptEvaluator, ServerRef,
};

/// Bundles a gateway and sink with inert defaults for everything else.
pub(crate) fn services_with(
    gateway: Arc<dyn Gateway>,
    sink: Arc<dyn PacketSink>,
) -> ExternalServices {
    ExternalServices {
        gateway,
        sink,
        scripts: Arc::new(ScriptedEvaluator::default()),
        seen: Arc::new(InMemorySeenStore::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        file_log: Arc::new(RecordingFileLog::default()),
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// [`PacketSink`] remembering every send, in order.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    servers: Vec<ServerRef>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    pub(crate) fn with_servers(servers: Vec<(&str, usize)>) -> Self {
        Self {
            servers: servers
                .into_iter()
                .map(|(name, player_count)| ServerRef {
                    name: name.to_string(),
                    player_count,
                })
                .collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

impl PacketSink for RecordingSink {
    fn send(&self, server: &str, bytes: &[u8]) {
        self.sent.lock().push((server.to_string(), bytes.to_vec()));
    }

    fn servers(&self) -> Vec<ServerRef> {
        self.servers.clone()
    }
}

// ---------------------------------------------------------------------------
// StubGateway
// ---------------------------------------------------------------------------

/// [`Gateway`] over a fixed player list, recording every side effect.
#[derive(Debug, Default)]
pub(crate) struct StubGateway {
    players: Mutex<Vec<PlayerRef>>,
    capabilities: Mutex<HashSet<(Uuid, String)>>,
    chats: Mutex<Vec<(String, String)>>,
    kicks: Mutex<Vec<(String, String)>>,
    player_commands: Mutex<Vec<(String, String)>>,
    console_commands: Mutex<Vec<String>>,
}

impl StubGateway {
    pub(crate) fn with_players(players: Vec<PlayerRef>) -> Self {
        Self {
            players: Mutex::new(players),
            ..Self::default()
        }
    }

    pub(crate) fn grant(&self, id: Uuid, capability: &str) {
        self.capabilities.lock().insert((id, capability.to_string()));
    }

    pub(crate) fn chats(&self) -> Vec<(String, String)> {
        self.chats.lock().clone()
    }

    pub(crate) fn kicks(&self) -> Vec<(String, String)> {
        self.kicks.lock().clone()
    }

    pub(crate) fn player_commands(&self) -> Vec<(String, String)> {
        self.player_commands.lock().clone()
    }

    pub(crate) fn console_commands(&self) -> Vec<String> {
        self.console_commands.lock().clone()
    }
}

impl Gateway for StubGateway {
    fn online_players(&self) -> Vec<PlayerRef> {
        self.players.lock().clone()
    }

    fn player_by_id(&self, id: Uuid) -> Option<PlayerRef> {
        self.players.lock().iter().find(|p| p.id == id).cloned()
    }

    fn has_capability(&self, player: &PlayerRef, name: &str) -> bool {
        self.capabilities
            .lock()
            .contains(&(player.id, name.to_string()))
    }

    fn send_chat(&self, player: &PlayerRef, text: &str) {
        self.chats
            .lock()
            .push((player.name.clone(), text.to_string()));
    }

    fn disconnect(&self, player: &PlayerRef, reason: &str) {
        self.kicks
            .lock()
            .push((player.name.clone(), reason.to_string()));
    }

    fn run_player_command(&self, player: &PlayerRef, command: &str) {
        self.player_commands
            .lock()
            .push((player.name.clone(), command.to_string()));
    }

    fn run_console_command(&self, command: &str) {
        self.console_commands.lock().push(command.to_string());
    }
}

// ---------------------------------------------------------------------------
// ScriptedEvaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum ScriptResult {
    Value(Option<bool>),
    Fail(String),
}

/// [`ScriptEvaluator`] answering from a fixed expression table; unknown
/// expressions have no opinion.
#[derive(Debug, Default)]
pub(crate) struct ScriptedEvaluator {
    results: Mutex<HashMap<String, ScriptResult>>,
}

impl ScriptedEvaluator {
    pub(crate) fn set(&self, expr: &str, result: ScriptResult) {
        self.results.lock().insert(expr.to_string(), result);
    }
}

impl ScriptEvaluator for ScriptedEvaluator {
    fn evaluate(
        &self,
        expr: &str,
        _bindings: &HashMap<String, String>,
    ) -> anyhow::Result<Option<bool>> {
        match self.results.lock().get(expr) {
            Some(ScriptResult::Value(value)) => Ok(*value),
            Some(ScriptResult::Fail(reason)) => Err(anyhow::anyhow!("{reason}")),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier / RecordingFileLog
// ---------------------------------------------------------------------------

/// [`NotificationSink`] remembering every notification; can be set to fail.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    notes: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub(crate) fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().clone()
    }

    pub(crate) fn fail_next(&self) {
        *self.fail.lock() = true;
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        if *self.fail.lock() {
            return Err(anyhow::anyhow!("notification sink offline"));
        }
        self.notes
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

/// [`FileLog`] remembering every appended line.
#[derive(Debug, Default)]
pub(crate) struct RecordingFileLog {
    lines: Mutex<Vec<(String, String)>>,
}

impl RecordingFileLog {
    pub(crate) fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().clone()
    }
}

impl FileLog for RecordingFileLog {
    fn append(&self, file: &str, line: &str) {
        self.lines
            .lock()
            .push((file.to_string(), line.to_string()));
    }
}
