//! Protocol codec for encoding/decoding frames
//!
//! Frames are packed field by field with named offsets. Every multi-byte
//! field is big-endian.

use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;
use thiserror::Error;

use super::{MessageKind, END_MARKER, FRAME_SIZE, START_MARKER};

/// Offset of the start marker
pub const START_OFFSET: usize = 0;
/// Offset of the big-endian u16 message type
pub const TYPE_OFFSET: usize = 1;
/// Offset of the big-endian u32 address
pub const ADDRESS_OFFSET: usize = 3;
/// Offset of the big-endian u32 payload length
///
/// The end marker overwrites the length's low byte, so only its upper three
/// bytes travel on the wire.
pub const LENGTH_OFFSET: usize = 7;
/// Offset of the end marker
pub const END_OFFSET: usize = 10;

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid message kind: {0}")]
    InvalidMessageKind(u16),

    #[error("Value {value} does not fit in {bits}-bit field '{field}'")]
    Encoding {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    #[error("Invalid marker at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    InvalidMarker {
        offset: usize,
        expected: u8,
        found: u8,
    },

    #[error("Invalid frame length: {0} bytes (expected 11)")]
    InvalidLength(usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a value into a big-endian u16 field, rejecting anything wider
pub fn encode_u16(field: &'static str, value: u64) -> CodecResult<[u8; 2]> {
    u16::try_from(value)
        .map(u16::to_be_bytes)
        .map_err(|_| CodecError::Encoding {
            field,
            value,
            bits: u16::BITS,
        })
}

/// Encode a value into a big-endian u32 field, rejecting anything wider
pub fn encode_u32(field: &'static str, value: u64) -> CodecResult<[u8; 4]> {
    u32::try_from(value)
        .map(u32::to_be_bytes)
        .map_err(|_| CodecError::Encoding {
            field,
            value,
            bits: u32::BITS,
        })
}

/// Encode the payload length as the three bytes that survive the end marker.
///
/// The value must fit in 32 bits and have a zero low byte.
pub fn encode_length(value: u64) -> CodecResult<[u8; 3]> {
    let [b0, b1, b2, low] = encode_u32("payload_length", value)?;
    if low != 0 {
        return Err(CodecError::Encoding {
            field: "payload_length",
            value,
            bits: 24,
        });
    }
    Ok([b0, b1, b2])
}

/// Build a raw frame from wire values.
///
/// Values that the frame cannot carry fail with [`CodecError::Encoding`]
/// instead of being truncated. The message type is not checked against the
/// known kinds; use [`Frame::new`] for typed construction.
pub fn build_frame(kind: u64, address: u64, payload_length: u64) -> CodecResult<[u8; FRAME_SIZE]> {
    let mut out = [0u8; FRAME_SIZE];
    out[START_OFFSET] = START_MARKER;
    out[TYPE_OFFSET..ADDRESS_OFFSET].copy_from_slice(&encode_u16("message_type", kind)?);
    out[ADDRESS_OFFSET..LENGTH_OFFSET].copy_from_slice(&encode_u32("address", address)?);
    out[LENGTH_OFFSET..END_OFFSET].copy_from_slice(&encode_length(payload_length)?);
    out[END_OFFSET] = END_MARKER;
    Ok(out)
}

/// A single request frame
///
/// Only built through [`Frame::new`], [`Frame::from_raw`] or
/// [`Frame::decode`], so the payload length always has a zero low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    message_type: u16,
    address: u32,
    payload_length: u32,
}

impl Frame {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            message_type: kind.id(),
            address: 0,
            payload_length: 0,
        }
    }

    /// Build a frame from unchecked wire values
    pub fn from_raw(message_type: u64, address: u64, payload_length: u64) -> CodecResult<Self> {
        let raw = build_frame(message_type, address, payload_length)?;
        Frame::decode(&raw)
    }

    /// Raw message type id
    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    /// Reserved address field, zero in practice
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Reserved payload length; no payload ever follows the frame
    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }

    /// Resolve the message type to a known kind
    pub fn kind(&self) -> CodecResult<MessageKind> {
        MessageKind::from_id(self.message_type)
    }

    /// Address field as an IPv4 address
    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    /// Serialize into a fixed-size array
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        let mut buf = &mut out[..];
        self.write_fields(&mut buf);
        out
    }

    /// Append the serialized frame to a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_SIZE);
        self.write_fields(buf);
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        let length = self.payload_length.to_be_bytes();
        buf.put_u8(START_MARKER);
        buf.put_u16(self.message_type);
        buf.put_u32(self.address);
        buf.put_slice(&length[..END_OFFSET - LENGTH_OFFSET]);
        buf.put_u8(END_MARKER);
    }

    /// Parse exactly one frame.
    ///
    /// Markers and length are validated; the message type is kept raw so
    /// that unknown kinds can still be reported by id.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != FRAME_SIZE {
            return Err(CodecError::InvalidLength(bytes.len()));
        }
        check_marker(bytes, START_OFFSET, START_MARKER)?;
        check_marker(bytes, END_OFFSET, END_MARKER)?;

        let [hi, lo] = field::<2>(bytes, TYPE_OFFSET)?;
        let address = field::<4>(bytes, ADDRESS_OFFSET)?;
        let [b0, b1, b2] = field::<3>(bytes, LENGTH_OFFSET)?;

        let frame = Self {
            message_type: u16::from_be_bytes([hi, lo]),
            address: u32::from_be_bytes(address),
            payload_length: u32::from_be_bytes([b0, b1, b2, 0]),
        };

        if frame.payload_length != 0 {
            tracing::warn!(
                "Frame declares reserved payload length {}; no payload follows",
                frame.payload_length
            );
        }

        Ok(frame)
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> CodecResult<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(CodecError::InvalidLength(bytes.len()))
}

fn check_marker(bytes: &[u8], offset: usize, expected: u8) -> CodecResult<()> {
    let found = bytes
        .get(offset)
        .copied()
        .ok_or(CodecError::InvalidLength(bytes.len()))?;
    if found != expected {
        return Err(CodecError::InvalidMarker {
            offset,
            expected,
            found,
        });
    }
    Ok(())
}

/// Decodes frames from a byte stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    frames_decoded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> CodecResult<Option<Frame>> {
        if let Some(&first) = buf.first() {
            check_marker(&[first], START_OFFSET, START_MARKER)?;
        }
        if buf.len() < FRAME_SIZE {
            return Ok(None);
        }

        let raw = buf.split_to(FRAME_SIZE);
        let frame = Frame::decode(&raw)?;
        self.frames_decoded += 1;
        Ok(Some(frame))
    }

    /// Number of frames decoded so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}
