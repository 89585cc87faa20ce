//! The declarative announcement-rule language.
//!
//! Rules are parsed once per (re)load from line-oriented source files into
//! immutable values; the engine in the server crate interprets them against
//! live events. Parsing lives here because it needs nothing beyond a line
//! reader.

mod message;
mod operator;
mod reader;

pub use message::{MessageRule, MessageRuleBuilder};
pub use operator::{split_alternatives, Directives, RuleDelay};
pub use reader::{RuleParseError, RuleSetReader};

use std::fmt;

// ---------------------------------------------------------------------------
// LifecycleKind
// ---------------------------------------------------------------------------

/// The lifecycle transitions a message rule can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// Player connected to the network.
    Join,
    /// Player left the network.
    Quit,
    /// Player moved between backend servers.
    Switch,
}

impl LifecycleKind {
    /// All kinds, in declaration order.
    pub const ALL: &'static [LifecycleKind] =
        &[LifecycleKind::Join, LifecycleKind::Quit, LifecycleKind::Switch];

    /// The config and file-name key of this kind.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Quit => "quit",
            Self::Switch => "switch",
        }
    }

    /// Resolves a key (case-insensitive) back to a kind.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.key().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
