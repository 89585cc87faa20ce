//! The replicated per-player record and the delta line grammar.
//!
//! Backend servers contribute player attributes as compact one-line deltas;
//! every node folds those lines into its own [`PlayerRecord`] index. The
//! grammar is intentionally sloppy-tolerant: unknown section keys are skipped
//! so older nodes survive newer contributors.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SyncKind
// ---------------------------------------------------------------------------

macro_rules! sync_kinds {
    ($( $variant:ident = $name:literal ),+ $(,)?) => {
        /// Tag identifying which class of player attribute a delta batch
        /// carries.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SyncKind {
            $( $variant, )+
        }

        impl SyncKind {
            /// All kinds, in declaration order.
            pub const ALL: &'static [SyncKind] = &[ $( SyncKind::$variant, )+ ];

            /// The wire name of this kind.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }

            /// Resolves a wire name back to a kind.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

sync_kinds! {
    Server = "SERVER",
    Nick = "NICK",
    Vanish = "VANISH",
    Afk = "AFK",
    Ignore = "IGNORE",
    IgnorePms = "IGNORE_PMS",
    Channels = "CHANNELS",
    Group = "GROUP",
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ChannelMode
// ---------------------------------------------------------------------------

/// What a player can do in a chat channel they are joined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Receive and send messages.
    Write,
    /// Receive messages but not send them.
    Read,
}

impl ChannelMode {
    /// The config key of this mode.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }

    /// Resolves a config key (case-insensitive) back to a mode.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        if key.eq_ignore_ascii_case("write") {
            Some(Self::Write)
        } else if key.eq_ignore_ascii_case("read") {
            Some(Self::Read)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerRecord
// ---------------------------------------------------------------------------

/// Replicated state for one currently-connected player.
///
/// Created when a player first appears in a roster broadcast and merged
/// incrementally from delta lines until the player drops out of every
/// contributing node's roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Display identity, the replication key.
    pub name: String,
    /// Stable unique id.
    pub id: Uuid,
    /// The backend server the player is currently on.
    pub server_name: String,
    /// Nickname, if one is set.
    pub nick: Option<String>,
    pub vanished: bool,
    pub afk: bool,
    pub ignoring_pms: bool,
    /// Ids of peers this player has ignored.
    pub ignored_players: HashSet<Uuid>,
    /// Channel name to the player's mode in it.
    pub channels: HashMap<String, ChannelMode>,
    /// Permission group name.
    pub group: String,
    /// Chat prefix.
    pub prefix: String,
}

impl PlayerRecord {
    /// Creates an empty record for a newly-seen player.
    #[must_use]
    pub fn new(name: impl Into<String>, id: Uuid) -> Self {
        Self {
            name: name.into(),
            id,
            server_name: String::new(),
            nick: None,
            vanished: false,
            afk: false,
            ignoring_pms: false,
            ignored_players: HashSet::new(),
            channels: HashMap::new(),
            group: String::new(),
            prefix: String::new(),
        }
    }

    /// The nickname if set, the plain name otherwise.
    #[must_use]
    pub fn name_or_nick(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.name)
    }

    /// Folds one delta line into the record.
    ///
    /// Sections are delimited by `.<<`; a bare `<<` is also accepted, with
    /// one trailing `.` stripped from the preceding section. Each section is
    /// `KEY:VALUE`; the value may itself contain `:`. Unknown keys are
    /// skipped, as are values that fail to parse, so a single bad section
    /// never poisons the rest of the line.
    pub fn apply_line(&mut self, line: &str) {
        let sections: Vec<&str> = line.split("<<").collect();
        let last = sections.len() - 1;

        for (index, raw) in sections.iter().enumerate() {
            let section = if index < last {
                raw.strip_suffix('.').unwrap_or(raw)
            } else {
                raw
            };
            let (key, value) = section.split_once(':').unwrap_or((section, ""));

            match key {
                "S" => self.server_name = value.to_string(),
                "N" => {
                    self.nick = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    };
                }
                "V" => self.vanished = parse_flag(value),
                "A" => self.afk = parse_flag(value),
                "IM" => self.ignoring_pms = parse_flag(value),
                "IP" => self.ignored_players = parse_uuid_list(value),
                "C" => self.channels = parse_channels(value),
                "G" => self.group = value.to_string(),
                "P" => self.prefix = value.to_string(),
                other => {
                    debug!(key = other, "skipping unknown delta section");
                }
            }
        }
    }

    /// Deterministic projection into template variables.
    ///
    /// Keys are stable across versions; booleans render as `"true"` /
    /// `"false"`.
    #[must_use]
    pub fn variables(&self) -> HashMap<String, String> {
        let flag = |b: bool| if b { "true" } else { "false" }.to_string();

        let mut map = HashMap::new();
        map.insert("player_name".into(), self.name.clone());
        map.insert("name".into(), self.name.clone());
        map.insert("player_nick".into(), self.name_or_nick().to_string());
        map.insert("nick".into(), self.name_or_nick().to_string());
        map.insert("player_group".into(), self.group.clone());
        map.insert("player_prefix".into(), self.prefix.clone());
        map.insert("player_server".into(), self.server_name.clone());
        map.insert("player_afk".into(), flag(self.afk));
        map.insert("player_ignoring_pms".into(), flag(self.ignoring_pms));
        map.insert("player_vanished".into(), flag(self.vanished));
        map
    }
}

// ---------------------------------------------------------------------------
// Section value parsing
// ---------------------------------------------------------------------------

/// The literal `"0"` is false; anything else, including empty, is true.
fn parse_flag(value: &str) -> bool {
    value != "0"
}

fn parse_uuid_list(value: &str) -> HashSet<Uuid> {
    if value.is_empty() {
        return HashSet::new();
    }
    value
        .split('|')
        .filter_map(|raw| match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                debug!(raw, "skipping unparseable id in ignore list");
                None
            }
        })
        .collect()
}

fn parse_channels(value: &str) -> HashMap<String, ChannelMode> {
    let mut channels = HashMap::new();
    for pair in value.split('|') {
        if pair.is_empty() {
            continue;
        }
        let (name, mode_key) = pair.split_once(':').unwrap_or((pair, ""));
        match ChannelMode::from_key(mode_key) {
            Some(mode) => {
                channels.insert(name.to_string(), mode);
            }
            None => debug!(channel = name, mode = mode_key, "skipping unknown channel mode"),
        }
    }
    channels
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PlayerRecord {
        PlayerRecord::new("Bob", Uuid::new_v4())
    }

    #[test]
    fn sync_kind_name_roundtrip() {
        for &kind in SyncKind::ALL {
            assert_eq!(SyncKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SyncKind::from_name("BOGUS"), None);
    }

    #[test]
    fn server_and_group_sections() {
        let mut rec = record();
        rec.apply_line("S:lobby.<<G:admin.<<P:[A]");
        assert_eq!(rec.server_name, "lobby");
        assert_eq!(rec.group, "admin");
        assert_eq!(rec.prefix, "[A]");
    }

    #[test]
    fn vanish_flag_toggles_via_variables() {
        let mut rec = record();

        rec.apply_line("V:1");
        assert_eq!(rec.variables()["player_vanished"], "true");

        rec.apply_line("V:0");
        assert_eq!(rec.variables()["player_vanished"], "false");
    }

    #[test]
    fn empty_flag_value_is_true() {
        let mut rec = record();
        rec.apply_line("A:");
        assert!(rec.afk);
    }

    #[test]
    fn nick_set_and_cleared() {
        let mut rec = record();

        rec.apply_line("N:Bobby");
        assert_eq!(rec.nick.as_deref(), Some("Bobby"));
        assert_eq!(rec.name_or_nick(), "Bobby");

        rec.apply_line("N:");
        assert_eq!(rec.nick, None);
        assert_eq!(rec.name_or_nick(), "Bob");
    }

    #[test]
    fn value_may_contain_colons() {
        let mut rec = record();
        rec.apply_line("P:rank:gold:star");
        assert_eq!(rec.prefix, "rank:gold:star");
    }

    #[test]
    fn last_section_keeps_trailing_dot() {
        let mut rec = record();
        rec.apply_line("N:Mr.<<P:Sr.");
        assert_eq!(rec.nick.as_deref(), Some("Mr"));
        assert_eq!(rec.prefix, "Sr.");
    }

    #[test]
    fn bare_delimiter_without_dot_is_accepted() {
        let mut rec = record();
        rec.apply_line("S:lobby<<V:1");
        assert_eq!(rec.server_name, "lobby");
        assert!(rec.vanished);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut rec = record();
        rec.apply_line("S:lobby.<<ZZ:whatever.<<V:1");
        assert_eq!(rec.server_name, "lobby");
        assert!(rec.vanished);
    }

    #[test]
    fn ignored_player_list_parses_and_skips_bad_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rec = record();

        rec.apply_line(&format!("IP:{a}|not-a-uuid|{b}"));
        assert_eq!(rec.ignored_players.len(), 2);
        assert!(rec.ignored_players.contains(&a));
        assert!(rec.ignored_players.contains(&b));

        rec.apply_line("IP:");
        assert!(rec.ignored_players.is_empty());
    }

    #[test]
    fn channels_parse_with_modes() {
        let mut rec = record();
        rec.apply_line("C:global:write|staff:read");
        assert_eq!(rec.channels["global"], ChannelMode::Write);
        assert_eq!(rec.channels["staff"], ChannelMode::Read);
    }

    #[test]
    fn variables_projection_is_complete() {
        let mut rec = record();
        rec.apply_line("S:lobby.<<N:Bobby.<<A:1.<<G:vip.<<P:[VIP]");

        let vars = rec.variables();
        assert_eq!(vars["player_name"], "Bob");
        assert_eq!(vars["name"], "Bob");
        assert_eq!(vars["player_nick"], "Bobby");
        assert_eq!(vars["nick"], "Bobby");
        assert_eq!(vars["player_server"], "lobby");
        assert_eq!(vars["player_group"], "vip");
        assert_eq!(vars["player_prefix"], "[VIP]");
        assert_eq!(vars["player_afk"], "true");
        assert_eq!(vars["player_ignoring_pms"], "false");
        assert_eq!(vars["player_vanished"], "false");
    }
}
