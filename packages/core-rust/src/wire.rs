//! Binary wire codec for inter-proxy messages.
//!
//! A message is a header followed by a positionally-typed payload:
//!
//! - UTF string: sender UUID in canonical text (nil UUID for node-originated
//!   messages)
//! - UTF string: origin node name
//! - UTF string: packet-kind name
//! - per payload field, in the exact order declared by
//!   [`PacketKind::schema`]: UTF string / 1-byte bool / 1 byte / 8-byte BE
//!   double / 4-byte BE float / 4-byte BE int / 8-byte BE long / 2-byte BE
//!   short / UTF string (UUID canonical text) / raw bytes
//!
//! "UTF string" is a u16 big-endian byte length followed by that many bytes
//! of UTF-8. Both the writer ([`OutgoingMessage`]) and the reader
//! ([`IncomingMessage`]) keep a cursor over the declared schema; any write or
//! read that disagrees with the declared field sequence fails loudly rather
//! than producing a silently skewed payload.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::packet::{FieldType, PacketKind};

/// Longest byte length a UTF string field can carry.
const MAX_UTF_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// Protocol errors raised by the codec. All of them are fatal to the message
/// being built or decoded; none are retried.
#[derive(Debug, Error)]
pub enum WireError {
    /// A written value's type is not the type the kind declares at the
    /// current position.
    #[error("cannot write {got} at position {position} of {kind}: schema expects {expected}")]
    UnsupportedFieldType {
        kind: PacketKind,
        position: usize,
        expected: FieldType,
        got: FieldType,
    },

    /// A write or read moved past the declared schema, or a read asked for a
    /// type other than the next declared one.
    #[error("schema violation on {kind}: {detail}")]
    SchemaViolation { kind: PacketKind, detail: String },

    /// The byte buffer itself is unusable: truncated, not UTF-8, an invalid
    /// UUID rendering, an unknown kind name, or an oversized string field.
    #[error("malformed packet: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// UTF string framing
// ---------------------------------------------------------------------------

fn put_utf(out: &mut Vec<u8>, value: &str) -> Result<(), WireError> {
    if value.len() > MAX_UTF_LEN {
        return Err(WireError::Malformed(format!(
            "utf field of {} bytes exceeds the {MAX_UTF_LEN}-byte limit",
            value.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    out.put_u16(value.len() as u16);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn get_utf(buf: &mut impl Buf) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Malformed("truncated utf length prefix".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(WireError::Malformed(format!(
            "utf field claims {len} bytes but only {} remain",
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| WireError::Malformed("utf field is not valid UTF-8".into()))
}

fn get_uuid(buf: &mut impl Buf) -> Result<Uuid, WireError> {
    let raw = get_utf(buf)?;
    Uuid::parse_str(&raw)
        .map_err(|_| WireError::Malformed(format!("expected a uuid, got {raw:?}")))
}

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// Builder for one outbound wire message.
///
/// Payload fields are appended through the typed `write_*` methods; each
/// write advances the schema cursor and is rejected if the kind does not
/// declare that type at that position.
#[derive(Debug)]
pub struct OutgoingMessage {
    sender: Uuid,
    origin: String,
    kind: PacketKind,
    head: usize,
    payload: Vec<u8>,
}

impl OutgoingMessage {
    /// Starts a node-originated message: nil sender UUID, empty origin name.
    #[must_use]
    pub fn new(kind: PacketKind) -> Self {
        Self::with_sender(Uuid::nil(), String::new(), kind)
    }

    /// Starts a message attributed to a specific sender and origin node.
    #[must_use]
    pub fn with_sender(sender: Uuid, origin: String, kind: PacketKind) -> Self {
        Self {
            sender,
            origin,
            kind,
            head: 0,
            payload: Vec::new(),
        }
    }

    /// The kind this message was created with.
    #[must_use]
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    fn move_head(&mut self, writing: FieldType) -> Result<(), WireError> {
        let schema = self.kind.schema();
        let Some(&expected) = schema.get(self.head) else {
            return Err(WireError::SchemaViolation {
                kind: self.kind,
                detail: format!(
                    "write past end of schema (max {} fields)",
                    schema.len()
                ),
            });
        };
        if expected != writing {
            return Err(WireError::UnsupportedFieldType {
                kind: self.kind,
                position: self.head,
                expected,
                got: writing,
            });
        }
        self.head += 1;
        Ok(())
    }

    /// Appends a UTF string field.
    pub fn write_str(&mut self, value: &str) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Str)?;
        put_utf(&mut self.payload, value)?;
        Ok(self)
    }

    /// Appends a boolean field.
    pub fn write_bool(&mut self, value: bool) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Bool)?;
        self.payload.put_u8(u8::from(value));
        Ok(self)
    }

    /// Appends a single byte field.
    pub fn write_byte(&mut self, value: u8) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Byte)?;
        self.payload.put_u8(value);
        Ok(self)
    }

    /// Appends an 8-byte double field.
    pub fn write_double(&mut self, value: f64) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Double)?;
        self.payload.put_f64(value);
        Ok(self)
    }

    /// Appends a 4-byte float field.
    pub fn write_float(&mut self, value: f32) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Float)?;
        self.payload.put_f32(value);
        Ok(self)
    }

    /// Appends a 4-byte signed integer field.
    pub fn write_int(&mut self, value: i32) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Int)?;
        self.payload.put_i32(value);
        Ok(self)
    }

    /// Appends an 8-byte signed long field.
    pub fn write_long(&mut self, value: i64) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Long)?;
        self.payload.put_i64(value);
        Ok(self)
    }

    /// Appends a 2-byte signed short field.
    pub fn write_short(&mut self, value: i16) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Short)?;
        self.payload.put_i16(value);
        Ok(self)
    }

    /// Appends a UUID field, rendered as its canonical text.
    pub fn write_uuid(&mut self, value: Uuid) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Uuid)?;
        put_utf(&mut self.payload, &value.to_string())?;
        Ok(self)
    }

    /// Appends an unframed raw byte run. Only valid as a kind's final field.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<&mut Self, WireError> {
        self.move_head(FieldType::Raw)?;
        self.payload.put_slice(value);
        Ok(self)
    }

    /// Serializes a value to JSON and appends it as one UTF string field.
    ///
    /// Used by the roster and delta-batch kinds whose map payloads travel as
    /// a single JSON string.
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, WireError> {
        let json = serde_json::to_string(value)
            .map_err(|err| WireError::Malformed(format!("json field failed to serialize: {err}")))?;
        self.write_str(&json)
    }

    /// Appends a string-to-string map as one JSON string field.
    pub fn write_map(&mut self, map: &HashMap<String, String>) -> Result<&mut Self, WireError> {
        self.write_json(map)
    }

    /// Compiles the header and payload into the final byte buffer.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(self.payload.len() + 64);
        put_utf(&mut out, &self.sender.to_string())?;
        put_utf(&mut out, &self.origin)?;
        put_utf(&mut out, self.kind.name())?;
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// IncomingMessage
// ---------------------------------------------------------------------------

/// One decoded inbound wire message.
///
/// The header (sender, origin, kind) is parsed eagerly by [`decode`];
/// payload fields are decoded lazily, one per `read_*` call, under the same
/// schema-cursor discipline as the writer. The untouched raw buffer stays
/// available through [`raw`] so routers can forward bytes unmodified.
///
/// [`decode`]: IncomingMessage::decode
/// [`raw`]: IncomingMessage::raw
#[derive(Debug)]
pub struct IncomingMessage {
    raw: Bytes,
    sender: Uuid,
    origin: String,
    kind: PacketKind,
    head: usize,
    cursor: usize,
}

impl IncomingMessage {
    /// Parses the header out of a raw buffer.
    pub fn decode(raw: Bytes) -> Result<Self, WireError> {
        let mut buf = &raw[..];
        let sender = get_uuid(&mut buf)?;
        let origin = get_utf(&mut buf)?;
        let kind_name = get_utf(&mut buf)?;
        let kind = PacketKind::from_name(&kind_name).ok_or_else(|| {
            WireError::Malformed(format!("unknown packet kind {kind_name:?}"))
        })?;
        let cursor = raw.len() - buf.remaining();

        Ok(Self {
            raw,
            sender,
            origin,
            kind,
            head: 0,
            cursor,
        })
    }

    /// The UUID of the player (or nil for a node) that produced this message.
    #[must_use]
    pub fn sender(&self) -> Uuid {
        self.sender
    }

    /// The name of the node the message originated on.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The packet kind named in the header.
    #[must_use]
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// The untouched raw bytes, for unmodified forwarding.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn move_head(&mut self, reading: FieldType) -> Result<(), WireError> {
        let schema = self.kind.schema();
        let Some(&expected) = schema.get(self.head) else {
            return Err(WireError::SchemaViolation {
                kind: self.kind,
                detail: format!("read past end of schema (max {} fields)", schema.len()),
            });
        };
        if expected != reading {
            return Err(WireError::SchemaViolation {
                kind: self.kind,
                detail: format!(
                    "read of {reading} at position {} but schema declares {expected}",
                    self.head
                ),
            });
        }
        self.head += 1;
        Ok(())
    }

    fn take_utf(&mut self) -> Result<String, WireError> {
        let mut buf = &self.raw[self.cursor..];
        let total = buf.remaining();
        let value = get_utf(&mut buf)?;
        let consumed = total - buf.remaining();
        self.cursor += consumed;
        Ok(value)
    }

    /// Reads the next field as a UTF string.
    pub fn read_str(&mut self) -> Result<String, WireError> {
        self.move_head(FieldType::Str)?;
        self.take_utf()
    }

    /// Reads the next field as a boolean.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        self.move_head(FieldType::Bool)?;
        let byte = self.take_fixed::<1>()?;
        Ok(byte[0] != 0)
    }

    /// Reads the next field as a single byte.
    pub fn read_byte(&mut self) -> Result<u8, WireError> {
        self.move_head(FieldType::Byte)?;
        Ok(self.take_fixed::<1>()?[0])
    }

    /// Reads the next field as an 8-byte double.
    pub fn read_double(&mut self) -> Result<f64, WireError> {
        self.move_head(FieldType::Double)?;
        Ok(f64::from_be_bytes(self.take_fixed::<8>()?))
    }

    /// Reads the next field as a 4-byte float.
    pub fn read_float(&mut self) -> Result<f32, WireError> {
        self.move_head(FieldType::Float)?;
        Ok(f32::from_be_bytes(self.take_fixed::<4>()?))
    }

    /// Reads the next field as a 4-byte signed integer.
    pub fn read_int(&mut self) -> Result<i32, WireError> {
        self.move_head(FieldType::Int)?;
        Ok(i32::from_be_bytes(self.take_fixed::<4>()?))
    }

    /// Reads the next field as an 8-byte signed long.
    pub fn read_long(&mut self) -> Result<i64, WireError> {
        self.move_head(FieldType::Long)?;
        Ok(i64::from_be_bytes(self.take_fixed::<8>()?))
    }

    /// Reads the next field as a 2-byte signed short.
    pub fn read_short(&mut self) -> Result<i16, WireError> {
        self.move_head(FieldType::Short)?;
        Ok(i16::from_be_bytes(self.take_fixed::<2>()?))
    }

    /// Reads the next field as a UUID in canonical text form.
    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        self.move_head(FieldType::Uuid)?;
        let raw = self.take_utf()?;
        Uuid::parse_str(&raw)
            .map_err(|_| WireError::Malformed(format!("expected a uuid, got {raw:?}")))
    }

    /// Reads the next field as an unframed raw byte run extending to the end
    /// of the buffer.
    pub fn read_raw(&mut self) -> Result<Bytes, WireError> {
        self.move_head(FieldType::Raw)?;
        let value = self.raw.slice(self.cursor..);
        self.cursor = self.raw.len();
        Ok(value)
    }

    /// Reads a JSON-encoded value out of the next UTF string field.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        let json = self.read_str()?;
        serde_json::from_str(&json)
            .map_err(|err| WireError::Malformed(format!("json field failed to parse: {err}")))
    }

    /// Reads a string-to-string map out of the next UTF string field.
    pub fn read_map(&mut self) -> Result<HashMap<String, String>, WireError> {
        self.read_json()
    }

    fn take_fixed<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let remaining = self.raw.len() - self.cursor;
        if remaining < N {
            return Err(WireError::Malformed(format!(
                "field needs {N} bytes but only {remaining} remain"
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.raw[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
