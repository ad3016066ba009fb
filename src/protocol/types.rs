//! Wire message types shared by the codec and the camera connection

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// "OMT" followed by protocol version 1
pub const MAGIC: u32 = 0x4F4D_5401;

/// Fixed header size: magic(4) kind(1) flags(1) seq(4) timestamp(8) length(4)
pub const HEADER_LEN: usize = 22;

/// Default upper bound for a single message payload
pub const DEFAULT_MAX_PAYLOAD: u32 = 10_000_000;

/// Elementary stream carried by a media packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Message kind byte of the wire header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Video = 1,
    Audio = 2,
    Hello = 3,
    Telemetry = 4,
    Reject = 5,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageKind::Video),
            2 => Some(MessageKind::Audio),
            3 => Some(MessageKind::Hello),
            4 => Some(MessageKind::Telemetry),
            5 => Some(MessageKind::Reject),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Media stream this message belongs to, if any
    pub fn media(self) -> Option<MediaKind> {
        match self {
            MessageKind::Video => Some(MediaKind::Video),
            MessageKind::Audio => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Hello => "hello",
            MessageKind::Telemetry => "telemetry",
            MessageKind::Reject => "reject",
        }
    }
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => MessageKind::Video,
            MediaKind::Audio => MessageKind::Audio,
        }
    }
}

/// Header flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const KEYFRAME: u8 = 0x01;
    pub const CODEC_CONFIG: u8 = 0x02;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn keyframe() -> Self {
        Self(Self::KEYFRAME)
    }

    pub const fn codec_config() -> Self {
        Self(Self::CODEC_CONFIG)
    }

    pub fn is_keyframe(self) -> bool {
        self.0 & Self::KEYFRAME != 0
    }

    pub fn is_codec_config(self) -> bool {
        self.0 & Self::CODEC_CONFIG != 0
    }
}

/// One framed message as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub flags: PacketFlags,
    pub seq: u32,
    pub timestamp_us: u64,
    pub payload: Bytes,
}

impl WireMessage {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            flags: PacketFlags::default(),
            seq: 0,
            timestamp_us: 0,
            payload: payload.into(),
        }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// A compressed media unit handed from the connection to the decoder
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub kind: MediaKind,
    pub seq: u32,
    /// Camera capture clock, microseconds
    pub capture_ts_us: u64,
    pub flags: PacketFlags,
    pub payload: Bytes,
    /// Local arrival time, used to anchor the camera clock
    pub received_at: Instant,
}

impl EncodedPacket {
    /// Converts a media message; returns `None` for control messages
    pub fn from_message(message: WireMessage, received_at: Instant) -> Option<Self> {
        let kind = message.kind.media()?;
        Some(Self {
            kind,
            seq: message.seq,
            capture_ts_us: message.timestamp_us,
            flags: message.flags,
            payload: message.payload,
            received_at,
        })
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.is_keyframe()
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.is_codec_config()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
