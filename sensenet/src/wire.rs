//! Wire format serialization and deserialization.
//!
//! Every message is a single fixed-width frame with no variable-length content:
//!
//! ```text
//! type (1) || msg_id (2) || sender (2) || destination (2) || value (2)
//! ```
//!
//! All multi-byte fields are big-endian. `type` is one of
//! `0 = DATA`, `1 = ACK`, `2 = ROUTE_PROBE`; ROUTE_PROBE carries the
//! announcer's hop count in `value`.
//!
//! Decoding is strict: a buffer whose length differs from [`FRAME_LEN`] or
//! whose tag is unknown is rejected, so the rest of the protocol never sees
//! a partially parsed message.

use core::fmt;

use crate::types::{Frame, Message, MessageKind, FRAME_LEN};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Empty buffer or ran out of bytes mid-field.
    UnexpectedEof,
    /// Buffer length does not match the frame width, or trailing bytes.
    InvalidLength,
    /// Unknown message type tag.
    InvalidMessageType,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of frame"),
            DecodeError::InvalidLength => write!(f, "invalid frame length"),
            DecodeError::InvalidMessageType => write!(f, "invalid message type"),
        }
    }
}

/// Cursor over a received byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    /// Read a u16 in big-endian format.
    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }
}

/// Cursor writing into a fixed frame buffer.
///
/// Writes past the end of the frame are ignored; the encoders below write
/// exactly [`FRAME_LEN`] bytes.
pub struct Writer {
    buf: Frame,
    pos: usize,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; FRAME_LEN],
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn write_u8(&mut self, v: u8) {
        if let Some(slot) = self.buf.get_mut(self.pos) {
            *slot = v;
            self.pos += 1;
        }
    }

    /// Write a u16 in big-endian format.
    pub fn write_u16_be(&mut self, v: u16) {
        for b in v.to_be_bytes() {
            self.write_u8(b);
        }
    }

    pub fn finish(self) -> Frame {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Encode into a complete frame.
    fn encode_to_frame(&self) -> Frame {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.kind.tag());
        w.write_u16_be(self.msg_id);
        w.write_u16_be(self.sender);
        w.write_u16_be(self.destination);
        w.write_u16_be(self.value);
    }
}

impl Decode for Message {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let kind = MessageKind::from_tag(r.read_u8()?).ok_or(DecodeError::InvalidMessageType)?;
        Ok(Message {
            kind,
            msg_id: r.read_u16_be()?,
            sender: r.read_u16_be()?,
            destination: r.read_u16_be()?,
            value: r.read_u16_be()?,
        })
    }
}

/// Encode a message into its frame.
pub fn encode(msg: &Message) -> Frame {
    msg.encode_to_frame()
}

/// Decode one frame.
///
/// Every kind has the same width, so the length check happens up front,
/// before the tag is inspected.
pub fn decode(data: &[u8]) -> Result<Message, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::UnexpectedEof);
    }
    if data.len() != FRAME_LEN {
        return Err(DecodeError::InvalidLength);
    }
    Message::decode_from_slice(data)
}
