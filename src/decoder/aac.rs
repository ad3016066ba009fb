//! AAC configuration parsing and the audio decoder pipeline

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    AudioCodec, CodecError, CodecFactory, DecodedFrame, DecoderStats, MediaData, SeqCheck,
    SeqTracker,
};
use crate::error::{BridgeError, Result};
use crate::protocol::{AudioParams, EncodedPacket, MediaKind};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Sampling frequencies indexed by `samplingFrequencyIndex`
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
pub const AOT_AAC_LC: u8 = 2;

/// The two-byte AudioSpecificConfig sent as audio codec config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
}

impl AudioSpecificConfig {
    /// Parse the leading fields of an AudioSpecificConfig
    ///
    /// Escaped object types and explicit sampling frequencies are not used by
    /// the camera clients and are rejected.
    pub fn parse(data: &[u8]) -> std::result::Result<Self, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::Corrupt(format!(
                "AudioSpecificConfig too short ({} bytes)",
                data.len()
            )));
        }

        let object_type = data[0] >> 3;
        let sample_rate_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let channel_config = (data[1] >> 3) & 0x0F;

        if object_type == 0 || object_type == 31 {
            return Err(CodecError::Corrupt(format!(
                "unsupported audio object type {}",
                object_type
            )));
        }
        if sample_rate_index as usize >= SAMPLE_RATES.len() {
            return Err(CodecError::Corrupt(format!(
                "unsupported sampling frequency index {}",
                sample_rate_index
            )));
        }
        if channel_config == 0 {
            return Err(CodecError::Corrupt(
                "channel configuration 0 is not supported".to_string(),
            ));
        }

        Ok(Self {
            object_type,
            sample_rate_index,
            channel_config,
        })
    }

    /// AAC-LC config for announced stream parameters
    ///
    /// Unknown rates fall back to 48 kHz.
    pub fn from_params(params: &AudioParams) -> Self {
        let sample_rate_index = SAMPLE_RATES
            .iter()
            .position(|rate| *rate == params.sample_rate)
            .unwrap_or(3) as u8;
        Self {
            object_type: AOT_AAC_LC,
            sample_rate_index,
            channel_config: params.channels.clamp(1, 7) as u8,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }

    pub fn channels(&self) -> u16 {
        match self.channel_config {
            7 => 8,
            n => n as u16,
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | (self.sample_rate_index >> 1),
            ((self.sample_rate_index & 0x01) << 7) | (self.channel_config << 3),
        ]
    }
}

/// Audio side of the decoder pipeline
///
/// AAC frames decode independently, so loss is counted but never gated.
/// The backend is built lazily from the most recent configuration.
pub struct AudioPipeline {
    factory: Arc<dyn CodecFactory>,
    codec: Option<Box<dyn AudioCodec>>,
    config: AudioSpecificConfig,
    seq: SeqTracker,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    stats: DecoderStats,
    output: VecDeque<DecodedFrame>,
    throttler: LogThrottler,
}

impl AudioPipeline {
    pub fn new(
        factory: Arc<dyn CodecFactory>,
        config: AudioSpecificConfig,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            factory,
            codec: None,
            config,
            seq: SeqTracker::default(),
            consecutive_errors: 0,
            max_consecutive_errors: max_consecutive_errors.max(1),
            stats: DecoderStats::default(),
            output: VecDeque::new(),
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn submit(&mut self, packet: &EncodedPacket) -> Result<()> {
        debug_assert_eq!(packet.kind, MediaKind::Audio);

        match self.seq.check(packet.seq) {
            SeqCheck::First | SeqCheck::Next => {}
            SeqCheck::Gap(missing) => {
                warn_throttled!(
                    self.throttler,
                    "audio_gap",
                    "Audio sequence gap: {} packet(s) lost before seq {}",
                    missing,
                    packet.seq
                );
                self.stats.degraded += 1;
            }
            SeqCheck::Stale => {
                debug!("Dropping stale audio packet seq {}", packet.seq);
                self.stats.degraded += 1;
                self.stats.dropped += 1;
                return Ok(());
            }
        }

        if packet.is_codec_config() {
            return match AudioSpecificConfig::parse(&packet.payload) {
                Ok(config) => {
                    if self.codec.is_none() || config != self.config {
                        info!(
                            "Audio config: AOT {}, {} Hz, {} channel(s)",
                            config.object_type,
                            config.sample_rate(),
                            config.channels()
                        );
                        self.config = config;
                        self.codec = None;
                        self.ensure_codec()?;
                    }
                    Ok(())
                }
                Err(e) => self.fault(e),
            };
        }

        self.ensure_codec()?;
        let Some(codec) = self.codec.as_mut() else {
            return Ok(());
        };

        match codec.decode(&packet.payload) {
            Ok(Some(block)) => {
                self.consecutive_errors = 0;
                self.stats.decoded += 1;
                self.output.push_back(DecodedFrame {
                    data: MediaData::Audio(block),
                    capture_ts_us: packet.capture_ts_us,
                    seq: packet.seq,
                    keyframe: false,
                    arrival: packet.received_at,
                });
                Ok(())
            }
            Ok(None) => {
                self.consecutive_errors = 0;
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += 1;
                self.fault(e)
            }
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DecodedFrame> + '_ {
        self.output.drain(..)
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn config(&self) -> AudioSpecificConfig {
        self.config
    }

    fn ensure_codec(&mut self) -> Result<()> {
        if self.codec.is_none() {
            let codec = self
                .factory
                .audio(&self.config)
                .map_err(|e| BridgeError::DecodeFatal(format!("audio decoder: {}", e)))?;
            self.codec = Some(codec);
        }
        Ok(())
    }

    fn fault(&mut self, error: CodecError) -> Result<()> {
        if let CodecError::Unavailable(reason) = &error {
            return Err(BridgeError::DecodeFatal(reason.clone()));
        }

        self.consecutive_errors += 1;
        self.stats.degraded += 1;
        warn_throttled!(self.throttler, "audio_decode", "Audio decode error: {}", error);

        if self.consecutive_errors >= self.max_consecutive_errors {
            return Err(BridgeError::DecodeFatal(format!(
                "{} consecutive audio decode errors, last: {}",
                self.consecutive_errors, error
            )));
        }
        Ok(())
    }
}
