//! Fixed-header framing for the camera wire protocol
//!
//! Every message starts with a 22-byte big-endian header:
//! - magic `u32` (`0x4F4D5401`)
//! - kind `u8` (1 video, 2 audio, 3 hello, 4 telemetry, 5 reject)
//! - flags `u8` (bit 0 keyframe, bit 1 codec config)
//! - seq `u32`, per-stream sequence number
//! - timestamp `u64`, capture clock in microseconds
//! - length `u32`, payload size in `1..=max_payload`
//!
//! A header that fails validation poisons the stream; no resynchronisation
//! is attempted.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::types::{MessageKind, PacketFlags, WireMessage, DEFAULT_MAX_PAYLOAD, HEADER_LEN, MAGIC};
use crate::error::{BridgeError, ProtocolError};

/// Parsed fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub kind: MessageKind,
    pub flags: PacketFlags,
    pub seq: u32,
    pub timestamp_us: u64,
    pub length: u32,
}

impl WireHeader {
    /// Parse and validate a header from exactly `HEADER_LEN` bytes
    pub fn parse(mut src: &[u8], max_payload: u32) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated);
        }

        let magic = src.get_u32();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let kind_byte = src.get_u8();
        let kind = MessageKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownKind(kind_byte))?;
        let flags = PacketFlags::from_bits(src.get_u8());
        let seq = src.get_u32();
        let timestamp_us = src.get_u64();
        let length = src.get_u32();

        if length == 0 || length > max_payload {
            return Err(ProtocolError::InvalidLength {
                length,
                max: max_payload,
            });
        }

        Ok(Self {
            kind,
            flags,
            seq,
            timestamp_us,
            length,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN);
        buf.put_u32(MAGIC);
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp_us);
        buf.put_u32(self.length);
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Head,
    Payload(WireHeader),
}

/// Stateful codec for use with `FramedRead`/`Framed`
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    state: DecodeState,
    max_payload: u32,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl WireCodec {
    pub fn new(max_payload: u32) -> Self {
        Self {
            state: DecodeState::Head,
            max_payload,
        }
    }

    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, BridgeError> {
        let header = match self.state {
            DecodeState::Head => {
                if src.len() < HEADER_LEN {
                    src.reserve(HEADER_LEN - src.len());
                    return Ok(None);
                }
                let header = WireHeader::parse(&src[..HEADER_LEN], self.max_payload)?;
                src.advance(HEADER_LEN);
                self.state = DecodeState::Payload(header);
                header
            }
            DecodeState::Payload(header) => header,
        };

        let length = header.length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length).freeze();
        self.state = DecodeState::Head;

        Ok(Some(WireMessage {
            kind: header.kind,
            flags: header.flags,
            seq: header.seq,
            timestamp_us: header.timestamp_us,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, BridgeError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() && matches!(self.state, DecodeState::Head) => Ok(None),
            None => Err(ProtocolError::Truncated.into()),
        }
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = BridgeError;

    fn encode(&mut self, message: WireMessage, dst: &mut BytesMut) -> Result<(), BridgeError> {
        encode_message(&message, self.max_payload, dst)
    }
}

/// Append one framed message to `dst`
pub fn encode_message(
    message: &WireMessage,
    max_payload: u32,
    dst: &mut BytesMut,
) -> Result<(), BridgeError> {
    let length = u32::try_from(message.payload.len()).unwrap_or(u32::MAX);
    if length == 0 || length > max_payload {
        return Err(ProtocolError::InvalidLength {
            length,
            max: max_payload,
        }
        .into());
    }

    let header = WireHeader {
        kind: message.kind,
        flags: message.flags,
        seq: message.seq,
        timestamp_us: message.timestamp_us,
        length,
    };
    dst.reserve(HEADER_LEN + message.payload.len());
    header.write(dst);
    dst.extend_from_slice(&message.payload);
    Ok(())
}
