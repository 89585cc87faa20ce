//! Runtime settings for one control-plane node.
//!
//! Plain structs with `Default` impls; binding them to a configuration file
//! is the embedder's concern.

use std::collections::{HashMap, HashSet};

use fleetlink_core::LifecycleKind;

/// Cluster name used for servers not assigned to any cluster.
pub const GLOBAL_CLUSTER: &str = "global";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Top-level settings for a node.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Display aliases for backend server names.
    pub server_aliases: HashMap<String, String>,
    /// Lifecycle announcement settings.
    pub messages: MessageSettings,
    /// Optional partitioning of backend servers into clusters.
    pub clusters: ClusterSettings,
    /// Period (and matching initial delay) of the sync scheduler, in ms.
    pub sync_period_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_aliases: HashMap::new(),
            messages: MessageSettings::default(),
            clusters: ClusterSettings::default(),
            sync_period_ms: 1000,
        }
    }
}

impl Settings {
    /// The display alias of a server, or the name itself when no alias is
    /// configured.
    #[must_use]
    pub fn server_alias(&self, name: &str) -> String {
        self.server_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Whether lifecycle events on this server (or alias) are silenced.
    #[must_use]
    pub fn is_ignored_server(&self, name: &str) -> bool {
        self.messages
            .ignored_servers
            .iter()
            .any(|ignored| ignored == name)
    }

    /// The cluster a backend server belongs to; servers outside every
    /// configured cluster share the [`GLOBAL_CLUSTER`].
    #[must_use]
    pub fn cluster_of(&self, server: &str) -> &str {
        if self.clusters.enabled {
            for (cluster, members) in &self.clusters.groups {
                if members.contains(server) {
                    return cluster;
                }
            }
        }
        GLOBAL_CLUSTER
    }
}

// ---------------------------------------------------------------------------
// MessageSettings
// ---------------------------------------------------------------------------

/// Settings for the lifecycle announcement engine.
#[derive(Debug, Clone)]
pub struct MessageSettings {
    /// Lifecycle kinds announcements are enabled for.
    pub apply_on: Vec<LifecycleKind>,
    /// Servers whose joins/switches/quits are never announced.
    pub ignored_servers: Vec<String>,
    /// A receiver already messaged by an earlier rule in the same event is
    /// skipped for later rules.
    pub stop_on_first_match: bool,
    /// How `stop_on_first_match` interacts with a rule carrying `then
    /// abort`; see [`FirstMatchPrecedence`].
    pub first_match_precedence: FirstMatchPrecedence,
    /// Default message prefix per lifecycle kind.
    pub prefix: HashMap<LifecycleKind, String>,
    /// Delay before a JOIN event's rule pipeline starts, in ms, giving
    /// backends time to report enriched attributes.
    pub defer_join_ms: u64,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            apply_on: LifecycleKind::ALL.to_vec(),
            ignored_servers: Vec::new(),
            stop_on_first_match: true,
            first_match_precedence: FirstMatchPrecedence::default(),
            prefix: HashMap::new(),
            defer_join_ms: 1000,
        }
    }
}

/// Precedence between `stop on first match` and a mid-chain `then abort`
/// for receivers already messaged earlier in the same event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FirstMatchPrecedence {
    /// First-match wins: an aborting rule skips already-messaged receivers
    /// like any other rule.
    #[default]
    SkipInAbortingRules,
    /// The aborting rule reaches every receiver, including those already
    /// messaged, before the chain stops.
    DeliverInAbortingRules,
}

// ---------------------------------------------------------------------------
// ClusterSettings
// ---------------------------------------------------------------------------

/// Partitioning of backend servers into forwarding clusters. When enabled,
/// packets are never forwarded outside the origin server's cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSettings {
    pub enabled: bool,
    /// Cluster name to its member server names.
    pub groups: HashMap<String, HashSet<String>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_falls_back_to_name() {
        let mut settings = Settings::default();
        settings
            .server_aliases
            .insert("lobby-1".to_string(), "Lobby".to_string());

        assert_eq!(settings.server_alias("lobby-1"), "Lobby");
        assert_eq!(settings.server_alias("survival"), "survival");
    }

    #[test]
    fn cluster_lookup_defaults_to_global() {
        let mut settings = Settings::default();
        settings.clusters.enabled = true;
        settings.clusters.groups.insert(
            "eu".to_string(),
            ["lobby-eu", "survival-eu"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );

        assert_eq!(settings.cluster_of("lobby-eu"), "eu");
        assert_eq!(settings.cluster_of("lobby-us"), GLOBAL_CLUSTER);
    }

    #[test]
    fn clusters_disabled_puts_everyone_in_global() {
        let mut settings = Settings::default();
        settings.clusters.groups.insert(
            "eu".to_string(),
            std::iter::once("lobby-eu".to_string()).collect(),
        );

        assert_eq!(settings.cluster_of("lobby-eu"), GLOBAL_CLUSTER);
    }

    #[test]
    fn defaults_announce_every_kind() {
        let settings = Settings::default();
        assert_eq!(settings.messages.apply_on.len(), 3);
        assert!(settings.messages.stop_on_first_match);
        assert_eq!(settings.sync_period_ms, 1000);
    }
}
