//! Decoder pipeline
//!
//! Turns [`EncodedPacket`](crate::protocol::EncodedPacket)s into raw frames.
//! Codec backends sit behind [`VideoCodec`] / [`AudioCodec`] and are built by
//! a [`CodecFactory`]; the pipelines on top own the gating, sequence checks
//! and error accounting.
//!
//! Codecs are created and used on the session's decode thread, so the codec
//! traits themselves do not require `Send`.

pub mod aac;
pub mod backend;
pub mod convert;
pub mod h264;

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::{MediaKind, VideoParams};

pub use aac::{AudioPipeline, AudioSpecificConfig};
pub use backend::DefaultCodecs;
pub use h264::VideoPipeline;

/// Decoded picture, NV12 with `stride` bytes per luma row
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPicture {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Nominal frame rate announced by the camera
    pub fps: u32,
    pub data: Bytes,
}

/// Decoded audio, planar f32 (all samples of channel 0, then channel 1, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_per_channel: usize,
    pub samples: Vec<f32>,
}

/// Raw sample buffer of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum MediaData {
    Video(VideoPicture),
    Audio(AudioBlock),
}

impl MediaData {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaData::Video(_) => MediaKind::Video,
            MediaData::Audio(_) => MediaKind::Audio,
        }
    }
}

/// Output of a decoder pipeline
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: MediaData,
    /// Camera capture clock, microseconds
    pub capture_ts_us: u64,
    pub seq: u32,
    pub keyframe: bool,
    /// Server-local arrival of the packet this frame was decoded from
    pub arrival: Instant,
}

impl DecodedFrame {
    pub fn kind(&self) -> MediaKind {
        self.data.kind()
    }
}

/// Backend failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input could not be decoded; later input may succeed
    #[error("corrupt input: {0}")]
    Corrupt(String),

    /// The backend cannot be used at all
    #[error("codec unavailable: {0}")]
    Unavailable(String),
}

/// H.264 backend
pub trait VideoCodec {
    /// Feed parameter sets (SPS/PPS); produces no picture
    fn configure(&mut self, parameter_sets: &[u8]) -> Result<(), CodecError>;

    /// Decode one Annex-B access unit
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoPicture>, CodecError>;
}

/// AAC backend
pub trait AudioCodec {
    /// Decode one raw AAC frame
    fn decode(&mut self, frame: &[u8]) -> Result<Option<AudioBlock>, CodecError>;
}

/// Creates codec backends for a session
pub trait CodecFactory: Send + Sync {
    fn video(&self, params: &VideoParams) -> Result<Box<dyn VideoCodec>, CodecError>;

    fn audio(&self, config: &AudioSpecificConfig) -> Result<Box<dyn AudioCodec>, CodecError>;
}

/// Pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Frames emitted
    pub decoded: u64,
    /// Packets discarded (gated, stale or undecodable)
    pub dropped: u64,
    /// Sub-fatal faults: gaps, reordering, corrupt input
    pub degraded: u64,
}

/// Relation of a sequence number to the last one seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeqCheck {
    First,
    Next,
    Gap(u32),
    Stale,
}

/// Sequence tracker tolerant of `u32` wrap-around
#[derive(Debug, Default)]
pub(crate) struct SeqTracker {
    last: Option<u32>,
}

impl SeqTracker {
    pub(crate) fn check(&mut self, seq: u32) -> SeqCheck {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SeqCheck::First;
        };

        let delta = seq.wrapping_sub(last);
        if delta == 0 || delta > u32::MAX / 2 {
            return SeqCheck::Stale;
        }

        self.last = Some(seq);
        if delta == 1 {
            SeqCheck::Next
        } else {
            SeqCheck::Gap(delta - 1)
        }
    }
}
