//! Packet kinds and their positional field schemas.
//!
//! Every inter-proxy message carries a [`PacketKind`] tag after its header.
//! Each kind declares the exact ordered list of [`FieldType`]s its payload
//! holds; the codec in [`crate::wire`] enforces that order on both the
//! writing and the reading side.

use std::fmt;

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// The primitive types a packet payload field may carry.
///
/// The on-wire encoding of each type is fixed (see [`crate::wire`]):
/// strings and UUIDs are u16-length-prefixed UTF-8, numeric types are
/// big-endian, booleans are a single byte, `Raw` is an unframed byte run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Bool,
    Byte,
    Double,
    Float,
    Int,
    Long,
    Short,
    Uuid,
    Raw,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::Uuid => "uuid",
            Self::Raw => "raw bytes",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

macro_rules! packet_kinds {
    ($( $(#[$doc:meta])* $variant:ident = $name:literal => [$($field:ident),*] ),+ $(,)?) => {
        /// Tag identifying the meaning and payload schema of a wire message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PacketKind {
            $( $(#[$doc])* $variant, )+
        }

        impl PacketKind {
            /// All kinds, in declaration order.
            pub const ALL: &'static [PacketKind] = &[ $( PacketKind::$variant, )+ ];

            /// The wire name of this kind.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }

            /// Resolves a wire name back to a kind. Unknown names yield `None`.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// The ordered payload schema declared by this kind.
            #[must_use]
            pub fn schema(self) -> &'static [FieldType] {
                match self {
                    $( Self::$variant => &[ $(FieldType::$field),* ], )+
                }
            }
        }
    };
}

packet_kinds! {
    /// Remove an already-delivered message from player screens.
    RemoveMessageById = "REMOVE_MESSAGE_BY_ID" => [Str, Uuid, Bool],
    /// Clear the game chat, optionally broadcasting a notice.
    ClearChat = "CLEAR_CHAT" => [Str],
    /// Run a command on another node or on the local proxy.
    ForwardCommand = "FORWARD_COMMAND" => [Str, Str],
    /// Update mute status for a channel or player.
    Mute = "MUTE" => [Str, Str, Bool, Str],
    /// Play a sound for one receiver.
    Sound = "SOUND" => [Str, Str],
    /// Announce a server alias downstream.
    ServerAlias = "SERVER_ALIAS" => [Str, Str],
    /// Backend reports a joining player's enriched attributes are resolved.
    ConfirmPlayerReady = "CONFIRM_PLAYER_READY" => [Uuid, Str],
    /// Broadcast a chat message in a channel.
    Channel = "CHANNEL" => [Str, Str, Uuid, Str, Str, Str, Long, Str, Bool, Bool, Bool],
    /// Broadcast a message to spying players.
    Spy = "SPY" => [Str, Str, Str, Str, Str],
    /// Send a toast popup to one receiver.
    Toast = "TOAST" => [Uuid, Str, Str, Str],
    /// Fleet-wide announcement.
    Announcement = "ANNOUNCEMENT" => [Str, Str, Str],
    /// Broadcast of the /me command.
    MeCommand = "ME" => [Uuid, Bool, Str],
    /// Show the message of the day to one receiver.
    Motd = "MOTD" => [Str],
    /// Notify players holding a permission.
    Notify = "NOTIFY" => [Str, Str],
    /// Plain text broadcast to everyone.
    PlainBroadcast = "PLAIN_BROADCAST" => [Str],
    /// Plain text message to one receiver.
    PlainMessage = "PLAIN_MESSAGE" => [Uuid, Str],
    /// Structured component message to one receiver.
    ComponentMessage = "COMPONENT_MESSAGE" => [Uuid, Str],
    /// Structured component broadcast to everyone.
    JsonBroadcast = "JSON_BROADCAST" => [Str],
    /// Player database row changed; backends must re-pull it.
    DbUpdate = "DB_UPDATE" => [Str, Str, Str, Str],
    /// Update a player's reply target.
    ReplyUpdate = "REPLY_UPDATE" => [Uuid, Str, Uuid],
    /// Sync one mail item across the fleet.
    MailSync = "MAIL_SYNC" => [Str],
    /// Full name-to-uuid roster of one node, as a JSON map field.
    ClusterHeader = "CLUSTER_HEADER" => [Str],
    /// One sync-kind delta batch: kind name plus a JSON player-to-line map.
    ClusterData = "CLUSTER_DATA" => [Str, Str],
}

impl PacketKind {
    /// Forced kinds are forwarded back to their own origin server as well,
    /// so structured-data broadcasts reach the backend that produced them.
    #[must_use]
    pub fn is_forced(self) -> bool {
        matches!(self, Self::DbUpdate)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
