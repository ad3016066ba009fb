//! H.264 access unit handling and the video decoder pipeline

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::{CodecError, DecodedFrame, DecoderStats, MediaData, SeqCheck, SeqTracker, VideoCodec};
use crate::error::{BridgeError, Result};
use crate::protocol::{EncodedPacket, MediaKind};
use crate::utils::LogThrottler;
use crate::warn_throttled;

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

/// Iterator over the NAL units of an Annex-B byte stream
///
/// Yields each unit without its start code. Data before the first start code
/// is ignored.
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Position and length of the next start code at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let (start, len) = find_start_code(self.data, self.pos)?;
        let begin = start + len;
        let end = find_start_code(self.data, begin)
            .map(|(next, _)| next)
            .unwrap_or(self.data.len());
        self.pos = end;
        Some(&self.data[begin..end])
    }
}

pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits { data, pos: 0 }
}

/// `nal_unit_type` of a NAL unit (start code already stripped)
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Whether the access unit contains an IDR slice
pub fn contains_idr(access_unit: &[u8]) -> bool {
    nal_units(access_unit).any(|nal| nal_type(nal) == Some(NAL_IDR))
}

/// Whether the access unit carries parameter sets
pub fn contains_parameter_sets(access_unit: &[u8]) -> bool {
    nal_units(access_unit).any(|nal| matches!(nal_type(nal), Some(NAL_SPS | NAL_PPS)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Drop everything until a keyframe arrives
    AwaitingKeyframe,
    Open,
}

/// Video side of the decoder pipeline
///
/// The gate starts closed. Any fault closes it again, so after loss or
/// corruption nothing is emitted until the next keyframe.
pub struct VideoPipeline {
    codec: Box<dyn VideoCodec>,
    fps: u32,
    gate: Gate,
    seq: SeqTracker,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    stats: DecoderStats,
    output: VecDeque<DecodedFrame>,
    throttler: LogThrottler,
}

impl VideoPipeline {
    pub fn new(codec: Box<dyn VideoCodec>, fps: u32, max_consecutive_errors: u32) -> Self {
        Self {
            codec,
            fps,
            gate: Gate::AwaitingKeyframe,
            seq: SeqTracker::default(),
            consecutive_errors: 0,
            max_consecutive_errors: max_consecutive_errors.max(1),
            stats: DecoderStats::default(),
            output: VecDeque::new(),
            throttler: LogThrottler::with_secs(5),
        }
    }

    /// Feed one video packet
    ///
    /// Only a backend that keeps failing, or one that reports itself
    /// unusable, is an error; everything else is absorbed and counted.
    pub fn submit(&mut self, packet: &EncodedPacket) -> Result<()> {
        debug_assert_eq!(packet.kind, MediaKind::Video);

        match self.seq.check(packet.seq) {
            SeqCheck::First | SeqCheck::Next => {}
            SeqCheck::Gap(missing) => {
                warn_throttled!(
                    self.throttler,
                    "video_gap",
                    "Video sequence gap: {} packet(s) lost before seq {}",
                    missing,
                    packet.seq
                );
                self.close_gate();
            }
            SeqCheck::Stale => {
                debug!("Dropping stale video packet seq {}", packet.seq);
                self.close_gate();
                self.stats.dropped += 1;
                return Ok(());
            }
        }

        if packet.is_codec_config() {
            return match self.codec.configure(&packet.payload) {
                Ok(()) => Ok(()),
                Err(e) => self.fault(e),
            };
        }

        let keyframe = packet.is_keyframe() || contains_idr(&packet.payload);
        if self.gate == Gate::AwaitingKeyframe {
            if !keyframe {
                self.stats.dropped += 1;
                return Ok(());
            }
            self.gate = Gate::Open;
        }

        match self.codec.decode(&packet.payload) {
            Ok(Some(mut picture)) => {
                self.consecutive_errors = 0;
                self.stats.decoded += 1;
                picture.fps = self.fps;
                self.output.push_back(DecodedFrame {
                    data: MediaData::Video(picture),
                    capture_ts_us: packet.capture_ts_us,
                    seq: packet.seq,
                    keyframe,
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

    /// Take the frames decoded so far, in submission order
    pub fn drain(&mut self) -> impl Iterator<Item = DecodedFrame> + '_ {
        self.output.drain(..)
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn is_awaiting_keyframe(&self) -> bool {
        self.gate == Gate::AwaitingKeyframe
    }

    fn close_gate(&mut self) {
        self.stats.degraded += 1;
        self.gate = Gate::AwaitingKeyframe;
    }

    fn fault(&mut self, error: CodecError) -> Result<()> {
        if let CodecError::Unavailable(reason) = &error {
            return Err(BridgeError::DecodeFatal(reason.clone()));
        }

        self.consecutive_errors += 1;
        self.close_gate();
        warn_throttled!(self.throttler, "video_decode", "Video decode error: {}", error);

        if self.consecutive_errors >= self.max_consecutive_errors {
            warn!(
                "Video decoder failed {} times in a row",
                self.consecutive_errors
            );
            return Err(BridgeError::DecodeFatal(format!(
                "{} consecutive video decode errors, last: {}",
                self.consecutive_errors, error
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::VideoPicture;
    use crate::protocol::{PacketFlags, WireMessage, MessageKind};
    use bytes::Bytes;
    use std::time::Instant;

    const IDR: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x88];
    const P_SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];

    /// Emits one picture per access unit; payloads starting with 0xEE are corrupt
    struct StubCodec {
        configured: usize,
    }

    impl VideoCodec for StubCodec {
        fn configure(&mut self, _parameter_sets: &[u8]) -> std::result::Result<(), CodecError> {
            self.configured += 1;
            Ok(())
        }

        fn decode(&mut self, access_unit: &[u8]) -> std::result::Result<Option<VideoPicture>, CodecError> {
            if access_unit.first() == Some(&0xEE) {
                return Err(CodecError::Corrupt("bad slice".to_string()));
            }
            Ok(Some(VideoPicture {
                width: 4,
                height: 2,
                stride: 4,
                fps: 0,
                data: Bytes::from(vec![0u8; 12]),
            }))
        }
    }

    fn packet(seq: u32, payload: &[u8], flags: PacketFlags) -> EncodedPacket {
        let message = WireMessage::new(MessageKind::Video, payload.to_vec())
            .with_seq(seq)
            .with_flags(flags)
            .with_timestamp(seq as u64 * 33_333);
        EncodedPacket::from_message(message, Instant::now()).unwrap()
    }

    fn pipeline() -> VideoPipeline {
        VideoPipeline::new(Box::new(StubCodec { configured: 0 }), 30, 3)
    }

    #[test]
    fn test_nal_scanner() {
        let types: Vec<u8> = nal_units(IDR).filter_map(nal_type).collect();
        assert_eq!(types, vec![NAL_SPS, NAL_PPS, NAL_IDR]);
        assert!(contains_idr(IDR));
        assert!(contains_parameter_sets(IDR));
        assert!(!contains_idr(P_SLICE));
        assert_eq!(nal_units(&[1, 2, 3]).count(), 0);
    }

    #[test]
    fn test_gate_opens_on_keyframe() {
        let mut video = pipeline();
        video.submit(&packet(1, P_SLICE, PacketFlags::default())).unwrap();
        assert!(video.is_awaiting_keyframe());
        assert_eq!(video.drain().count(), 0);

        // IDR detected from the bitstream even without the flag
        video.submit(&packet(2, IDR, PacketFlags::default())).unwrap();
        video.submit(&packet(3, P_SLICE, PacketFlags::default())).unwrap();
        let frames: Vec<_> = video.drain().collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].keyframe);
        assert!(!frames[1].keyframe);
        match &frames[0].data {
            MediaData::Video(picture) => assert_eq!(picture.fps, 30),
            MediaData::Audio(_) => panic!("expected video"),
        }
        assert_eq!(video.stats().dropped, 1);
    }

    #[test]
    fn test_sequence_gap_drops_until_keyframe() {
        let mut video = pipeline();
        video.submit(&packet(1, IDR, PacketFlags::keyframe())).unwrap();
        video.submit(&packet(2, P_SLICE, PacketFlags::default())).unwrap();
        // seq 3 lost
        video.submit(&packet(4, P_SLICE, PacketFlags::default())).unwrap();
        video.submit(&packet(5, P_SLICE, PacketFlags::default())).unwrap();
        video.submit(&packet(6, IDR, PacketFlags::keyframe())).unwrap();

        let seqs: Vec<u32> = video.drain().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 6]);
        assert_eq!(video.stats().degraded, 1);
        assert_eq!(video.stats().dropped, 2);
    }

    #[test]
    fn test_duplicate_and_reordered_packets() {
        let mut video = pipeline();
        video.submit(&packet(1, IDR, PacketFlags::keyframe())).unwrap();
        video.submit(&packet(1, P_SLICE, PacketFlags::default())).unwrap();
        video.submit(&packet(2, P_SLICE, PacketFlags::default())).unwrap();

        let seqs: Vec<u32> = video.drain().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1]);
        assert_eq!(video.stats().degraded, 1);
        assert!(video.is_awaiting_keyframe());
    }

    #[test]
    fn test_codec_config_produces_no_output() {
        let mut video = pipeline();
        video.submit(&packet(1, IDR, PacketFlags::codec_config())).unwrap();
        assert_eq!(video.drain().count(), 0);
        assert!(video.is_awaiting_keyframe());
    }

    #[test]
    fn test_corrupt_input_closes_gate_and_eventually_fails() {
        let mut video = pipeline();
        video.submit(&packet(1, IDR, PacketFlags::keyframe())).unwrap();
        video.submit(&packet(2, &[0xEE, 1], PacketFlags::keyframe())).unwrap();
        video.submit(&packet(3, P_SLICE, PacketFlags::default())).unwrap();
        assert_eq!(video.drain().count(), 1);
        assert_eq!(video.stats().degraded, 1);

        video.submit(&packet(4, &[0xEE, 2], PacketFlags::keyframe())).unwrap();
        let err = video
            .submit(&packet(5, &[0xEE, 3], PacketFlags::keyframe()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::DecodeFatal(_)));
    }
}
