//! `FleetLink` Core — wire protocol, replicated player records, and the
//! announcement-rule language.

pub mod packet;
pub mod record;
pub mod rules;
pub mod wire;

pub use packet::{FieldType, PacketKind};
pub use record::{ChannelMode, PlayerRecord, SyncKind};
pub use rules::{LifecycleKind, MessageRule, RuleParseError, RuleSetReader};
pub use wire::{IncomingMessage, OutgoingMessage, WireError};
