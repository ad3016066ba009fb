//! Sender contract and the per-camera adapter
//!
//! A [`SenderBackend`] opens named outlets; a [`SenderAdapter`] owns one
//! outlet and translates synchronized frames into the capability's buffer
//! layout.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decoder::MediaData;
use crate::error::{BridgeError, Result};
use crate::sync::SyncedFrame;

/// FourCC `NV12`
pub const CODEC_NV12: i32 = 0x3231_564E;
/// FourCC `FPA1`: planar 32-bit float audio
pub const CODEC_FPA1: i32 = 0x3141_5046;
/// ITU-R BT.709
pub const COLOR_SPACE_BT709: i32 = 709;

/// Encoding quality requested from the sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OmtQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl OmtQuality {
    pub fn as_raw(self) -> i32 {
        match self {
            OmtQuality::Low => 1,
            OmtQuality::Medium => 50,
            OmtQuality::High => 100,
        }
    }
}

impl fmt::Display for OmtQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmtQuality::Low => write!(f, "low"),
            OmtQuality::Medium => write!(f, "medium"),
            OmtQuality::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OmtFrameType {
    Video = 2,
    Audio = 4,
}

/// One frame in the capability's layout, borrowing the sample data
#[derive(Debug, Clone, Copy)]
pub struct OmtMediaFrame<'a> {
    pub frame_type: OmtFrameType,
    /// 100 ns units
    pub timestamp: i64,
    pub codec: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub frame_rate_n: i32,
    pub frame_rate_d: i32,
    pub aspect_ratio: f32,
    pub color_space: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub samples_per_channel: i32,
    pub data: &'a [u8],
}

impl<'a> OmtMediaFrame<'a> {
    pub fn from_synced(frame: &'a SyncedFrame) -> Self {
        let timestamp = (frame.pts_us as i64).saturating_mul(10);
        match &frame.data {
            MediaData::Video(picture) => Self {
                frame_type: OmtFrameType::Video,
                timestamp,
                codec: CODEC_NV12,
                width: picture.width as i32,
                height: picture.height as i32,
                stride: picture.width as i32,
                frame_rate_n: picture.fps as i32 * 1000,
                frame_rate_d: 1000,
                aspect_ratio: if picture.height > 0 {
                    picture.width as f32 / picture.height as f32
                } else {
                    0.0
                },
                color_space: COLOR_SPACE_BT709,
                sample_rate: 0,
                channels: 0,
                samples_per_channel: 0,
                data: &picture.data,
            },
            MediaData::Audio(block) => Self {
                frame_type: OmtFrameType::Audio,
                timestamp,
                codec: CODEC_FPA1,
                width: 0,
                height: 0,
                stride: 0,
                frame_rate_n: 0,
                frame_rate_d: 0,
                aspect_ratio: 0.0,
                color_space: 0,
                sample_rate: block.sample_rate as i32,
                channels: block.channels as i32,
                samples_per_channel: block.samples_per_channel as i32,
                data: bytemuck::cast_slice(&block.samples),
            },
        }
    }
}

/// Failure reported by an outlet for one frame
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The frame was refused; the outlet may still accept later frames
    #[error("frame rejected (code {0})")]
    Rejected(i32),

    /// The outlet can no longer be used
    #[error("{0}")]
    Fatal(String),
}

/// One open, named source
pub trait SenderOutlet: Send {
    fn send(&mut self, frame: &OmtMediaFrame<'_>) -> std::result::Result<(), SendFailure>;

    /// Network address the source is announced on, if known
    fn address(&self) -> Option<String> {
        None
    }
}

/// The sending capability
pub trait SenderBackend: Send + Sync {
    /// Open a named outlet; failure means the capability is unavailable
    fn open(&self, name: &str, quality: OmtQuality) -> Result<Box<dyn SenderOutlet>>;

    /// Check whether outlets can be opened again
    fn check_available(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub video_sent: u64,
    pub audio_sent: u64,
    pub rejected: u64,
}

/// Owns one outlet for one camera slot
pub struct SenderAdapter {
    name: String,
    outlet: Option<Box<dyn SenderOutlet>>,
    consecutive_rejections: u32,
    max_rejections: u32,
    stats: SenderStats,
}

impl SenderAdapter {
    pub fn open(
        backend: &dyn SenderBackend,
        name: &str,
        quality: OmtQuality,
        max_rejections: u32,
    ) -> Result<Self> {
        let outlet = backend.open(name, quality)?;
        match outlet.address() {
            Some(address) => info!("OMT source '{}' open at {}", name, address),
            None => info!("OMT source '{}' open", name),
        }
        Ok(Self {
            name: name.to_string(),
            outlet: Some(outlet),
            consecutive_rejections: 0,
            max_rejections: max_rejections.max(1),
            stats: SenderStats::default(),
        })
    }

    /// Send one frame
    ///
    /// Isolated rejections are counted; a fatal failure or a run of
    /// `max_rejections` rejections is `SenderUnavailable`.
    pub fn send(&mut self, frame: &SyncedFrame) -> Result<()> {
        let Some(outlet) = self.outlet.as_mut() else {
            return Err(BridgeError::SenderUnavailable(format!(
                "source '{}' is closed",
                self.name
            )));
        };

        let omt = OmtMediaFrame::from_synced(frame);
        match outlet.send(&omt) {
            Ok(()) => {
                self.consecutive_rejections = 0;
                match omt.frame_type {
                    OmtFrameType::Video => self.stats.video_sent += 1,
                    OmtFrameType::Audio => self.stats.audio_sent += 1,
                }
                Ok(())
            }
            Err(SendFailure::Rejected(code)) => {
                self.stats.rejected += 1;
                self.consecutive_rejections += 1;
                debug!("OMT source '{}' rejected a frame (code {})", self.name, code);
                if self.consecutive_rejections >= self.max_rejections {
                    warn!(
                        "OMT source '{}' rejected {} frames in a row",
                        self.name, self.consecutive_rejections
                    );
                    return Err(BridgeError::SenderUnavailable(format!(
                        "source '{}' rejected {} consecutive frames",
                        self.name, self.consecutive_rejections
                    )));
                }
                Ok(())
            }
            Err(SendFailure::Fatal(reason)) => Err(BridgeError::SenderUnavailable(format!(
                "source '{}': {}",
                self.name, reason
            ))),
        }
    }

    /// Release the outlet; later sends fail
    pub fn close(&mut self) {
        if self.outlet.take().is_some() {
            info!("OMT source '{}' closed", self.name);
        }
    }

    pub fn is_open(&self) -> bool {
        self.outlet.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }
}

impl Drop for SenderAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
