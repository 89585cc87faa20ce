//! The rule-interpretation engine for lifecycle announcements.
//!
//! One event (join, quit, switch) is evaluated against the ordered rule
//! chain loaded for its kind: every rule is gated by [`check::MessageCheck`],
//! matched per candidate receiver, and — on its first eligible receiver —
//! fires its side-effecting directives exactly once. Cooperative
//! short-circuiting uses an explicit [`StepOutcome`] instead of exceptions;
//! real errors in one rule are logged and never stop the rest of the chain.

mod check;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use fleetlink_core::{
    LifecycleKind, MessageRule, OutgoingMessage, PacketKind, RuleParseError, RuleSetReader,
    WireError,
};

use crate::config::Settings;
use crate::replica::StateReplica;
use crate::router::LOCAL_NODE_TARGET;
use crate::traits::{ExternalServices, PlayerRef};

use check::MessageCheck;

/// Delay before deferred `then warn` messages reach the actor.
const WARN_DELAY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// StepOutcome / EventDisposition
// ---------------------------------------------------------------------------

/// What one rule's evaluation asks the chain iterator to do next.
///
/// `AbortChain` and `Handled` are cooperative control flow, not failures;
/// they are consumed exactly at the per-rule iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Evaluate the next rule.
    Continue,
    /// Stop evaluating further rules for this event.
    AbortChain,
    /// The whole event is decided; stop and report the disposition.
    Handled { cancelled: bool, silent: bool },
}

/// The final fate of one lifecycle event after its chain ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDisposition {
    /// The event was cancelled outright.
    pub cancelled: bool,
    /// Cancelled, but only the actor is told it went through.
    pub silent: bool,
}

impl EventDisposition {
    /// The event ran to completion without being cancelled.
    #[must_use]
    pub fn allowed() -> Self {
        Self {
            cancelled: false,
            silent: false,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// A real failure inside one rule's evaluation. Caught at the per-rule
/// boundary; the rest of the chain still runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("script evaluation failed: {0}")]
    Script(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// RuleStore
// ---------------------------------------------------------------------------

/// Loaded rule chains per lifecycle kind, plus the mutable evaluation state
/// (message rotation, cooldowns) that outlives individual immutable rules.
///
/// Chains swap atomically on reload; a kind whose source fails to parse
/// keeps its previous chain authoritative.
pub struct RuleStore {
    reader: RuleSetReader,
    chains: ArcSwap<HashMap<LifecycleKind, Arc<Vec<MessageRule>>>>,
    rotation: Mutex<HashMap<(LifecycleKind, String), usize>>,
    cooldowns: Mutex<HashMap<(LifecycleKind, String), Instant>>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: RuleSetReader::default(),
            chains: ArcSwap::new(Arc::new(HashMap::new())),
            rotation: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// The loaded chain for a kind; empty when nothing is loaded.
    #[must_use]
    pub fn chain(&self, kind: LifecycleKind) -> Arc<Vec<MessageRule>> {
        self.chains
            .load()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    /// Replaces one kind's chain directly, bypassing file parsing.
    pub fn replace_chain(&self, kind: LifecycleKind, rules: Vec<MessageRule>) {
        let mut next = HashMap::clone(&self.chains.load());
        next.insert(kind, Arc::new(rules));
        self.chains.store(Arc::new(next));
    }

    /// Re-reads every lifecycle kind's rule source from `dir`
    /// (`join.rs`, `quit.rs`, `switch.rs`).
    ///
    /// A kind whose file is missing loads as an empty chain; a kind whose
    /// file fails to parse keeps its previous chain, and the failure is
    /// returned. The swap is atomic per reload.
    pub fn reload_from_dir(&self, dir: &Path) -> Vec<RuleParseError> {
        let mut next = HashMap::clone(&self.chains.load());
        let mut failures = Vec::new();

        for &kind in LifecycleKind::ALL {
            let path = dir.join(format!("{}.rs", kind.key()));
            if !path.exists() {
                next.insert(kind, Arc::new(Vec::new()));
                continue;
            }
            match self.reader.load_file(kind, &path) {
                Ok(rules) => {
                    next.insert(kind, Arc::new(rules));
                }
                Err(err) => {
                    error!(kind = %kind, %err, "keeping previous rule chain");
                    failures.push(err);
                }
            }
        }

        self.chains.store(Arc::new(next));
        failures
    }

    /// The next rotation index for a rule's message list. Monotonic modulo
    /// `len`, shared across all receivers of one event.
    pub(crate) fn next_message_index(
        &self,
        kind: LifecycleKind,
        group: &str,
        len: usize,
    ) -> usize {
        let mut rotation = self.rotation.lock();
        let slot = rotation.entry((kind, group.to_string())).or_insert(0);
        if *slot >= len {
            *slot = 0;
        }
        let index = *slot;
        *slot += 1;
        index
    }

    /// Whether a rule's cooldown has elapsed; arms the cooldown when it has.
    pub(crate) fn cooldown_ready(
        &self,
        kind: LifecycleKind,
        group: &str,
        every: Duration,
    ) -> bool {
        let mut cooldowns = self.cooldowns.lock();
        let key = (kind, group.to_string());
        let now = Instant::now();

        match cooldowns.get(&key) {
            Some(last) if now.duration_since(*last) < every => false,
            _ => {
                cooldowns.insert(key, now);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RuleEngine
// ---------------------------------------------------------------------------

/// Evaluates lifecycle events against their rule chains and performs the
/// resulting actions through the injected external services.
pub struct RuleEngine {
    pub(crate) local_node: String,
    pub(crate) store: Arc<RuleStore>,
    pub(crate) replica: Arc<StateReplica>,
    pub(crate) services: ExternalServices,
    pub(crate) settings: Arc<Settings>,
}

impl RuleEngine {
    #[must_use]
    pub fn new(
        local_node: impl Into<String>,
        store: Arc<RuleStore>,
        replica: Arc<StateReplica>,
        services: ExternalServices,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            local_node: local_node.into(),
            store,
            replica,
            services,
            settings,
        }
    }

    /// The store holding this engine's rule chains.
    #[must_use]
    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Entry point for one lifecycle event.
    ///
    /// Does nothing when announcements are disabled for the kind. JOIN
    /// events are deferred by the configured delay so backends can report
    /// enriched attributes first; QUIT and SWITCH run immediately.
    pub fn broadcast(
        self: &Arc<Self>,
        kind: LifecycleKind,
        actor: &PlayerRef,
        variables: HashMap<String, String>,
    ) {
        if !self.settings.messages.apply_on.contains(&kind) {
            return;
        }

        let defer = Duration::from_millis(self.settings.messages.defer_join_ms);
        if kind == LifecycleKind::Join && !defer.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let engine = Arc::clone(self);
                let actor = actor.clone();
                handle.spawn(async move {
                    tokio::time::sleep(defer).await;
                    engine.run_event(kind, &actor, variables);
                });
                return;
            }
        }

        self.run_event(kind, actor, variables);
    }

    /// Runs one event through its rule chain, returning its disposition.
    pub fn run_event(
        &self,
        kind: LifecycleKind,
        actor: &PlayerRef,
        variables: HashMap<String, String>,
    ) -> EventDisposition {
        let chain = self.store.chain(kind);
        let mut check = MessageCheck::new(self, kind, actor.clone(), variables);

        for rule in chain.iter() {
            if !check.can_filter(rule) {
                continue;
            }
            match check.filter(rule) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::AbortChain) => {
                    if !rule.directives.ignore_verbose {
                        debug!(rule = rule.uid(), "stopping further rule checks");
                    }
                    break;
                }
                Ok(StepOutcome::Handled { cancelled, silent }) => {
                    return EventDisposition { cancelled, silent };
                }
                Err(err) => {
                    warn!(rule = rule.uid(), %err, "error filtering rule; continuing with the next");
                }
            }
        }

        EventDisposition::allowed()
    }

    /// Publishes a console command to every peer node.
    pub(crate) fn broadcast_command(&self, command: &str) {
        match self.encode_forward_command(command) {
            Ok(bytes) => {
                for server in self.services.sink.servers() {
                    if server.player_count == 0 {
                        continue;
                    }
                    self.services.sink.send(&server.name, &bytes);
                }
            }
            Err(err) => error!(%err, "failed to encode forwarded command"),
        }
    }

    fn encode_forward_command(&self, command: &str) -> Result<Vec<u8>, WireError> {
        let mut message = OutgoingMessage::with_sender(
            Uuid::nil(),
            self.local_node.clone(),
            PacketKind::ForwardCommand,
        );
        message.write_str(LOCAL_NODE_TARGET)?;
        message.write_str(command)?;
        message.encode()
    }
}

// ---------------------------------------------------------------------------
// Deferred one-shot actions
// ---------------------------------------------------------------------------

/// Runs `action` after `delay` on the current runtime; with no runtime in
/// reach it runs inline, which keeps synchronous embedders and tests
/// deterministic.
pub(crate) fn defer_action(delay: Duration, action: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                action();
            });
        }
        Err(_) => action(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests;
