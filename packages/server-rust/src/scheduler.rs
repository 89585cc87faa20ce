//! The periodic replication job and its delta buffer.
//!
//! Every tick broadcasts the authoritative local roster, then flushes each
//! buffered per-sync-kind delta batch: one wire message per kind, applied
//! to the local replica in the same step so this node observes its own
//! writes immediately. Deltas lost to a failed tick are superseded by the
//! contributing node's next upload; convergence is eventual, not durable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use fleetlink_core::{OutgoingMessage, PacketKind, SyncKind, WireError};

use crate::replica::StateReplica;
use crate::traits::{Gateway, PacketSink};

// ---------------------------------------------------------------------------
// DeltaBuffer
// ---------------------------------------------------------------------------

/// Per-sync-kind batches of player deltas accumulated between ticks.
///
/// Within one tick the first write for a (kind, player) pair wins; later
/// writes for the same pair are dropped to keep the payload small. The next
/// tick starts fresh, so newer values always supersede eventually.
#[derive(Debug, Default)]
pub struct DeltaBuffer {
    batches: Mutex<HashMap<SyncKind, HashMap<String, String>>>,
}

impl DeltaBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages one delta line. Returns `false` when an earlier line for the
    /// same (kind, player) already holds the slot this tick.
    pub fn queue(&self, kind: SyncKind, player: &str, line: &str) -> bool {
        let mut batches = self.batches.lock();
        let batch = batches.entry(kind).or_default();
        if batch.contains_key(player) {
            debug!(player, %kind, "delta slot already taken this tick");
            return false;
        }
        batch.insert(player.to_string(), line.to_string());
        true
    }

    /// Merges a batch received from another node, insert-if-absent per
    /// player. Empty player names are dropped.
    pub fn merge(&self, kind: SyncKind, incoming: HashMap<String, String>) {
        let mut batches = self.batches.lock();
        let batch = batches.entry(kind).or_default();
        for (player, line) in incoming {
            if player.is_empty() {
                continue;
            }
            batch.entry(player).or_insert(line);
        }
    }

    /// Runs `per_kind` over every staged batch, then clears the buffer.
    /// The lock is held throughout, so writers queued mid-flush land in the
    /// next tick rather than vanish.
    pub fn flush<F>(&self, mut per_kind: F)
    where
        F: FnMut(SyncKind, &HashMap<String, String>),
    {
        let mut batches = self.batches.lock();
        for (kind, batch) in batches.iter() {
            per_kind(*kind, batch);
        }
        batches.clear();
    }

    /// A copy of the staged batch for one kind, for inspection in tests.
    #[must_use]
    pub fn staged(&self, kind: SyncKind) -> Option<HashMap<String, String>> {
        self.batches.lock().get(&kind).cloned()
    }
}

// ---------------------------------------------------------------------------
// SyncScheduler
// ---------------------------------------------------------------------------

/// The work of one replication tick. Driven periodically by [`SyncDriver`];
/// callable directly where tests or embedders need deterministic ticks.
pub struct SyncScheduler {
    local_node: String,
    replica: Arc<StateReplica>,
    buffer: Arc<DeltaBuffer>,
    gateway: Arc<dyn Gateway>,
    sink: Arc<dyn PacketSink>,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(
        local_node: impl Into<String>,
        replica: Arc<StateReplica>,
        buffer: Arc<DeltaBuffer>,
        gateway: Arc<dyn Gateway>,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            local_node: local_node.into(),
            replica,
            buffer,
            gateway,
            sink,
        }
    }

    /// The buffer this scheduler flushes.
    #[must_use]
    pub fn buffer(&self) -> &Arc<DeltaBuffer> {
        &self.buffer
    }

    /// One full replication tick: roster broadcast, then delta flush.
    pub fn tick(&self) {
        let mut roster = HashMap::new();
        for player in self.gateway.online_players() {
            roster.insert(player.name, player.id);
        }
        self.replica.upsert_roster(&self.local_node, roster.clone());

        match self.encode_roster(&roster) {
            Ok(bytes) => self.broadcast(&bytes),
            Err(err) => error!(%err, "failed to encode roster header"),
        }

        self.buffer.flush(|kind, batch| {
            match self.encode_batch(kind, batch) {
                Ok(bytes) => {
                    self.broadcast(&bytes);
                    self.replica.apply_batch(kind, batch);
                }
                // One bad batch must not block the other kinds or the next
                // tick; the next upload supersedes it.
                Err(err) => warn!(%kind, %err, "dropping delta batch for this tick"),
            }
        });
    }

    fn encode_roster(&self, roster: &HashMap<String, Uuid>) -> Result<Vec<u8>, WireError> {
        let wire_roster: HashMap<String, String> = roster
            .iter()
            .map(|(name, id)| (name.clone(), id.to_string()))
            .collect();

        let mut message = OutgoingMessage::with_sender(
            Uuid::nil(),
            self.local_node.clone(),
            PacketKind::ClusterHeader,
        );
        message.write_map(&wire_roster)?;
        message.encode()
    }

    fn encode_batch(
        &self,
        kind: SyncKind,
        batch: &HashMap<String, String>,
    ) -> Result<Vec<u8>, WireError> {
        let mut message = OutgoingMessage::with_sender(
            Uuid::nil(),
            self.local_node.clone(),
            PacketKind::ClusterData,
        );
        message.write_str(kind.name())?;
        message.write_map(batch)?;
        message.encode()
    }

    /// Sends bytes to every non-empty backend connection. Empty servers are
    /// skipped so packets cannot stack up on idle connections.
    fn broadcast(&self, bytes: &[u8]) {
        for server in self.sink.servers() {
            if server.player_count == 0 {
                debug!(server = %server.name, "not broadcasting to empty server");
                continue;
            }
            self.sink.send(&server.name, bytes);
        }
    }
}

// ---------------------------------------------------------------------------
// SyncDriver
// ---------------------------------------------------------------------------

/// Commands accepted by the running driver task.
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a tick now, outside the periodic schedule.
    FlushNow,
}

/// Background task running [`SyncScheduler::tick`] on a fixed period, with
/// an initial delay equal to the period.
pub struct SyncDriver {
    tx: Option<mpsc::Sender<SyncCommand>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SyncDriver {
    /// Spawns the driver task.
    #[must_use]
    pub fn start(scheduler: Arc<SyncScheduler>, period: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<SyncCommand>(16);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    command = rx.recv() => {
                        match command {
                            Some(SyncCommand::FlushNow) => scheduler.tick(),
                            None => break,
                        }
                    }
                    _ = interval.tick() => scheduler.tick(),
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Requests an off-schedule tick.
    ///
    /// # Errors
    ///
    /// Returns an error when the driver has been stopped.
    pub async fn flush_now(&self) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(SyncCommand::FlushNow)
                .await
                .map_err(|_| anyhow::anyhow!("sync driver stopped")),
            None => Err(anyhow::anyhow!("sync driver not running")),
        }
    }

    /// Stops the driver and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
