//! The eventually-consistent index of replicated player records.
//!
//! Each contributing node periodically broadcasts its complete roster;
//! membership here is always derived from the union of the latest roster of
//! every contributor — full snapshots, never incremental add/remove events,
//! so lost deletes cannot cause drift. Attribute deltas merge into existing
//! records and silently miss players who already disconnected.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use fleetlink_core::{PlayerRecord, SyncKind};

// ---------------------------------------------------------------------------
// StateReplica
// ---------------------------------------------------------------------------

/// Exclusive owner of the per-player record index. Every other component
/// reads cloned snapshots.
#[derive(Debug, Default)]
pub struct StateReplica {
    entries: RwLock<HashMap<String, PlayerRecord>>,
    /// Latest full roster contributed by each node.
    rosters: RwLock<HashMap<String, HashMap<String, Uuid>>>,
    /// Signaled after every mutation, for [`await_snapshot`] waiters.
    ///
    /// [`await_snapshot`]: StateReplica::await_snapshot
    changed: Notify,
}

impl StateReplica {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces one node's roster contribution and reconciles membership.
    ///
    /// Players listed by any contributor gain a record; players listed by
    /// none are evicted. Re-applying an identical roster is a no-op.
    pub fn upsert_roster(&self, node: &str, roster: HashMap<String, Uuid>) {
        let mut rosters = self.rosters.write();
        let mut entries = self.entries.write();

        rosters.insert(node.to_string(), roster);

        let mut live: HashMap<&str, Uuid> = HashMap::new();
        for contribution in rosters.values() {
            for (name, id) in contribution {
                live.entry(name.as_str()).or_insert(*id);
            }
        }

        for (name, id) in &live {
            if !entries.contains_key(*name) {
                entries.insert((*name).to_string(), PlayerRecord::new(*name, *id));
            }
        }
        entries.retain(|name, _| live.contains_key(name.as_str()));

        drop(entries);
        drop(rosters);
        self.changed.notify_waiters();
    }

    /// Drops one node's roster contribution entirely, evicting players only
    /// it was listing.
    pub fn forget_node(&self, node: &str) {
        let mut rosters = self.rosters.write();
        let mut entries = self.entries.write();

        rosters.remove(node);

        entries.retain(|name, _| {
            rosters
                .values()
                .any(|contribution| contribution.contains_key(name))
        });
    }

    /// Merges one delta line into one player's record. Unknown players are
    /// a race with disconnect and are silently skipped.
    pub fn apply_delta(&self, kind: SyncKind, player: &str, line: &str) {
        let mut entries = self.entries.write();
        Self::merge_entry(&mut entries, kind, player, line);
        drop(entries);
        self.changed.notify_waiters();
    }

    /// Merges a whole batch under one lock acquisition.
    pub fn apply_batch(&self, kind: SyncKind, batch: &HashMap<String, String>) {
        let mut entries = self.entries.write();
        for (player, line) in batch {
            Self::merge_entry(&mut entries, kind, player, line);
        }
        drop(entries);
        self.changed.notify_waiters();
    }

    /// Creates-or-updates one player from a backend confirmation payload.
    ///
    /// Unlike [`apply_delta`](Self::apply_delta) this may introduce the
    /// record, because the confirming backend knows the player is connected
    /// even if no roster broadcast has carried them yet.
    pub fn apply_single(&self, player: &str, id: Uuid, line: &str) {
        let mut entries = self.entries.write();
        entries
            .entry(player.to_string())
            .or_insert_with(|| PlayerRecord::new(player, id))
            .apply_line(line);
        drop(entries);
        self.changed.notify_waiters();
    }

    /// Waits until the replica learns about `player`, up to `timeout`.
    ///
    /// Explicit asynchronous lookup for callers that need a record another
    /// component is about to contribute; no thread ever spins for it.
    pub async fn await_snapshot(&self, player: &str, timeout: Duration) -> Option<PlayerRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register the waiter before checking, so a write between the
            // check and the wait cannot be missed.
            let changed = self.changed.notified();
            if let Some(record) = self.snapshot(player) {
                return Some(record);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.snapshot(player);
            }
        }
    }

    /// A read-only clone of one player's record.
    #[must_use]
    pub fn snapshot(&self, player: &str) -> Option<PlayerRecord> {
        self.entries.read().get(player).cloned()
    }

    /// Template variables for one player, if known.
    #[must_use]
    pub fn variables(&self, player: &str) -> Option<HashMap<String, String>> {
        self.entries.read().get(player).map(PlayerRecord::variables)
    }

    /// Names of every player currently known to the replica.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn merge_entry(
        entries: &mut HashMap<String, PlayerRecord>,
        kind: SyncKind,
        player: &str,
        line: &str,
    ) {
        match entries.get_mut(player) {
            Some(record) => {
                debug!(player, %kind, line, "merging delta");
                record.apply_line(line);
            }
            None => debug!(player, %kind, "delta for unknown player; skipping"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn roster(entries: &[(&str, Uuid)]) -> HashMap<String, Uuid> {
        entries
            .iter()
            .map(|(name, id)| ((*name).to_string(), *id))
            .collect()
    }

    #[test]
    fn roster_adds_and_evicts_players() {
        let replica = StateReplica::new();
        let bob = Uuid::new_v4();
        let cara = Uuid::new_v4();

        replica.upsert_roster("node-a", roster(&[("Bob", bob), ("Cara", cara)]));
        assert!(replica.snapshot("Bob").is_some());
        assert!(replica.snapshot("Cara").is_some());

        replica.upsert_roster("node-a", roster(&[("Bob", bob)]));
        assert!(replica.snapshot("Bob").is_some());
        assert!(replica.snapshot("Cara").is_none());
    }

    #[test]
    fn player_survives_while_any_contributor_lists_them() {
        let replica = StateReplica::new();
        let bob = Uuid::new_v4();
        let cara = Uuid::new_v4();

        // Node B saw both players; node A's narrower roster must not evict
        // Cara while B still lists her.
        replica.upsert_roster("node-b", roster(&[("Bob", bob), ("Cara", cara)]));
        replica.upsert_roster("node-a", roster(&[("Bob", bob)]));
        assert!(replica.snapshot("Cara").is_some());

        // Only when B also drops her does she go away.
        replica.upsert_roster("node-b", roster(&[("Bob", bob)]));
        assert!(replica.snapshot("Cara").is_none());
    }

    #[test]
    fn reapplying_the_same_roster_changes_nothing() {
        let replica = StateReplica::new();
        let bob = Uuid::new_v4();

        replica.upsert_roster("node-a", roster(&[("Bob", bob)]));
        replica.apply_delta(SyncKind::Vanish, "Bob", "V:1");
        let before = replica.snapshot("Bob").unwrap();

        replica.upsert_roster("node-a", roster(&[("Bob", bob)]));
        assert_eq!(replica.snapshot("Bob").unwrap(), before);
        assert_eq!(replica.names().len(), 1);
    }

    #[test]
    fn delta_for_unknown_player_is_a_noop() {
        let replica = StateReplica::new();
        replica.apply_delta(SyncKind::Vanish, "Ghost", "V:1");
        assert!(replica.snapshot("Ghost").is_none());
    }

    #[test]
    fn delta_merges_into_existing_record() {
        let replica = StateReplica::new();
        replica.upsert_roster("node-a", roster(&[("Bob", Uuid::new_v4())]));

        replica.apply_delta(SyncKind::Server, "Bob", "S:lobby");
        replica.apply_delta(SyncKind::Vanish, "Bob", "V:1");

        let record = replica.snapshot("Bob").unwrap();
        assert_eq!(record.server_name, "lobby");
        assert!(record.vanished);
    }

    #[test]
    fn apply_single_creates_the_record() {
        let replica = StateReplica::new();
        let id = Uuid::new_v4();

        replica.apply_single("Ann", id, "S:lobby.<<G:vip");

        let record = replica.snapshot("Ann").unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.server_name, "lobby");
        assert_eq!(record.group, "vip");
    }

    #[test]
    fn variables_project_from_the_record() {
        let replica = StateReplica::new();
        replica.upsert_roster("node-a", roster(&[("Bob", Uuid::new_v4())]));
        replica.apply_delta(SyncKind::Vanish, "Bob", "V:1");

        let vars = replica.variables("Bob").unwrap();
        assert_eq!(vars["player_vanished"], "true");

        replica.apply_delta(SyncKind::Vanish, "Bob", "V:0");
        let vars = replica.variables("Bob").unwrap();
        assert_eq!(vars["player_vanished"], "false");
    }

    #[tokio::test(start_paused = true)]
    async fn await_snapshot_resolves_when_the_record_arrives() {
        let replica = Arc::new(StateReplica::new());
        let id = Uuid::new_v4();

        let writer = replica.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.apply_single("Ann", id, "S:lobby");
        });

        let record = replica
            .await_snapshot("Ann", Duration::from_secs(5))
            .await
            .expect("record arrives before the timeout");
        assert_eq!(record.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn await_snapshot_times_out_for_unknown_players() {
        let replica = StateReplica::new();
        let record = replica
            .await_snapshot("Ghost", Duration::from_millis(100))
            .await;
        assert!(record.is_none());
    }

    #[test]
    fn forget_node_drops_only_its_players() {
        let replica = StateReplica::new();
        let bob = Uuid::new_v4();
        let cara = Uuid::new_v4();

        replica.upsert_roster("node-a", roster(&[("Bob", bob)]));
        replica.upsert_roster("node-b", roster(&[("Bob", bob), ("Cara", cara)]));

        replica.forget_node("node-b");
        assert!(replica.snapshot("Bob").is_some());
        assert!(replica.snapshot("Cara").is_none());
    }
}
