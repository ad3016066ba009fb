//! Audio/video synchronizer
//!
//! Maps one camera's capture clock onto the bridge's presentation clock and
//! paces audio against video. The first video keyframe is the clock anchor:
//!
//! ```text
//! pts = (anchor_arrival - epoch) + (capture_ts - anchor_capture_ts)
//! ```
//!
//! Video is released as soon as it is available and is never dropped; a late
//! frame is re-stamped so output stays non-decreasing. Audio is released once
//! its pts is within the drift window of the video clock. Audio that falls
//! more than the window behind the last released timestamp is dropped; audio
//! that is behind but within the window is re-stamped forward.
//!
//! A capture timestamp that strays from the anchor mapping by more than
//! `max_clock_jump` is a clock discontinuity: video re-anchors on the frame
//! and drops what was buffered, audio is dropped until video catches up.

mod jitter;

pub use jitter::JitterBuffer;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::decoder::{DecodedFrame, MediaData};
use crate::error::{BridgeError, Result};
use crate::protocol::MediaKind;

/// A decoded frame stamped on the presentation clock
#[derive(Debug, Clone)]
pub struct SyncedFrame {
    /// Microseconds since the session epoch
    pub pts_us: u64,
    pub capture_ts_us: u64,
    pub seq: u32,
    pub keyframe: bool,
    /// Server-local arrival of the packet the frame was decoded from
    pub arrival: Instant,
    pub data: MediaData,
}

impl SyncedFrame {
    pub fn kind(&self) -> MediaKind {
        self.data.kind()
    }
}

/// Result of a pull
#[derive(Debug)]
pub enum SyncPoll {
    Ready(SyncedFrame),
    NotReady,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub video_released: u64,
    pub audio_released: u64,
    pub audio_dropped: u64,
    pub audio_restamped: u64,
    pub video_restamped: u64,
    pub overflow_dropped: u64,
    pub pre_anchor_dropped: u64,
    /// Times the camera clock jumped and video re-anchored
    pub clock_resets: u64,
    /// Frames discarded because of a clock jump
    pub discontinuity_dropped: u64,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    capture_ts_us: u64,
    /// Anchor arrival relative to the epoch
    offset_us: u64,
}

impl Anchor {
    fn pts(&self, capture_ts_us: u64) -> u64 {
        if capture_ts_us >= self.capture_ts_us {
            self.offset_us
                .saturating_add(capture_ts_us - self.capture_ts_us)
        } else {
            self.offset_us
                .saturating_sub(self.capture_ts_us - capture_ts_us)
        }
    }

    /// Distance between a frame's capture time and the capture time the
    /// anchor predicts for its arrival
    fn skew_us(&self, capture_ts_us: u64, offset_us: u64) -> u64 {
        let captured = i128::from(capture_ts_us) - i128::from(self.capture_ts_us);
        let arrived = i128::from(offset_us) - i128::from(self.offset_us);
        u64::try_from((captured - arrived).unsigned_abs()).unwrap_or(u64::MAX)
    }
}

pub struct Synchronizer {
    epoch: Instant,
    require_audio: bool,
    drift_window_us: u64,
    max_clock_jump_us: u64,
    anchor_deadline: Duration,
    /// Start of the anchor deadline
    deadline_from: Instant,
    video_anchor: Option<Anchor>,
    audio_seen: bool,
    anchored: bool,
    video: JitterBuffer,
    audio: JitterBuffer,
    /// Highest video pts pushed so far
    video_clock_us: Option<u64>,
    last_out_us: Option<u64>,
    stats: SyncStats,
}

impl Synchronizer {
    /// `require_audio` is false when the camera announced no audio
    pub fn new(config: &SyncConfig, require_audio: bool, epoch: Instant) -> Self {
        Self {
            epoch,
            require_audio,
            drift_window_us: config.drift_window().as_micros() as u64,
            max_clock_jump_us: config.max_clock_jump().as_micros() as u64,
            anchor_deadline: config.anchor_deadline(),
            deadline_from: epoch,
            video_anchor: None,
            audio_seen: false,
            anchored: false,
            video: JitterBuffer::new(config.jitter_capacity),
            audio: JitterBuffer::new(config.jitter_capacity),
            video_clock_us: None,
            last_out_us: None,
            stats: SyncStats::default(),
        }
    }

    /// Measure the anchor deadline from `at` rather than from the epoch
    pub fn with_deadline_from(mut self, at: Instant) -> Self {
        self.deadline_from = at;
        self
    }

    pub fn push(&mut self, frame: DecodedFrame) {
        let offset_us = frame.arrival.saturating_duration_since(self.epoch).as_micros() as u64;
        let evicted = match frame.kind() {
            MediaKind::Video => {
                match self.video_anchor {
                    None => {
                        if !frame.keyframe {
                            self.stats.pre_anchor_dropped += 1;
                            return;
                        }
                        let anchor = Anchor {
                            capture_ts_us: frame.capture_ts_us,
                            offset_us,
                        };
                        debug!(
                            "Video anchor: capture {} us -> pts {} us",
                            anchor.capture_ts_us, anchor.offset_us
                        );
                        self.video_anchor = Some(anchor);
                    }
                    Some(anchor) => {
                        let skew = anchor.skew_us(frame.capture_ts_us, offset_us);
                        if skew > self.max_clock_jump_us {
                            self.reanchor(&frame, offset_us, skew);
                        }
                    }
                }
                if let Some(anchor) = &self.video_anchor {
                    let pts = anchor.pts(frame.capture_ts_us);
                    self.video_clock_us = Some(self.video_clock_us.map_or(pts, |c| c.max(pts)));
                }
                self.video.push(frame)
            }
            MediaKind::Audio => {
                if let Some(anchor) = &self.video_anchor {
                    if anchor.skew_us(frame.capture_ts_us, offset_us) > self.max_clock_jump_us {
                        self.stats.discontinuity_dropped += 1;
                        return;
                    }
                }
                self.audio_seen = true;
                self.audio.push(frame)
            }
        };

        if evicted.is_some() {
            self.stats.overflow_dropped += 1;
        }
    }

    /// Restart the capture clock mapping on `frame`
    fn reanchor(&mut self, frame: &DecodedFrame, offset_us: u64, skew_us: u64) {
        warn!(
            "Camera clock jumped by {} ms, re-anchoring on capture {} us",
            skew_us / 1000,
            frame.capture_ts_us
        );
        let (video, audio) = self.buffered();
        self.stats.discontinuity_dropped += (video + audio) as u64;
        self.stats.clock_resets += 1;
        self.video.clear();
        self.audio.clear();
        self.video_anchor = Some(Anchor {
            capture_ts_us: frame.capture_ts_us,
            offset_us,
        });
        self.video_clock_us = None;
    }

    /// Whether every required anchor exists
    pub fn is_anchored(&self) -> bool {
        self.video_anchor.is_some() && (self.audio_seen || !self.require_audio)
    }

    /// Next frame in presentation order, if one may be released
    ///
    /// Fails with `SyncTimeout` once the anchor deadline passes without all
    /// anchors.
    pub fn pull(&mut self, now: Instant) -> Result<SyncPoll> {
        if !self.anchored {
            if !self.is_anchored() {
                if now.saturating_duration_since(self.deadline_from) > self.anchor_deadline {
                    return Err(BridgeError::SyncTimeout(self.anchor_deadline));
                }
                return Ok(SyncPoll::NotReady);
            }
            self.anchored = true;
            info!("Synchronizer anchored");
        }

        let Some(anchor) = self.video_anchor else {
            return Ok(SyncPoll::NotReady);
        };

        loop {
            let video_pts = self.video.front_ts().map(|ts| anchor.pts(ts));
            let audio_pts = self
                .audio
                .front_ts()
                .map(|ts| anchor.pts(ts))
                .filter(|pts| self.audio_eligible(*pts));

            let take_video = match (video_pts, audio_pts) {
                (Some(v), Some(a)) => v <= a,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => return Ok(SyncPoll::NotReady),
            };

            if take_video {
                let Some(frame) = self.video.pop() else {
                    return Ok(SyncPoll::NotReady);
                };
                let pts = anchor.pts(frame.capture_ts_us);
                let out = match self.last_out_us {
                    Some(last) if pts < last => {
                        self.stats.video_restamped += 1;
                        last
                    }
                    _ => pts,
                };
                self.stats.video_released += 1;
                return Ok(SyncPoll::Ready(self.release(frame, out)));
            }

            let Some(frame) = self.audio.pop() else {
                return Ok(SyncPoll::NotReady);
            };
            let pts = anchor.pts(frame.capture_ts_us);
            let floor = self.last_out_us.unwrap_or(anchor.offset_us);
            if pts.saturating_add(self.drift_window_us) < floor {
                self.stats.audio_dropped += 1;
                continue;
            }
            let out = match self.last_out_us {
                Some(last) if pts < last => {
                    self.stats.audio_restamped += 1;
                    last
                }
                _ => pts,
            };
            self.stats.audio_released += 1;
            return Ok(SyncPoll::Ready(self.release(frame, out)));
        }
    }

    fn audio_eligible(&self, pts: u64) -> bool {
        match self.video_clock_us {
            Some(clock) => pts <= clock.saturating_add(self.drift_window_us),
            None => false,
        }
    }

    fn release(&mut self, frame: DecodedFrame, pts_us: u64) -> SyncedFrame {
        self.last_out_us = Some(pts_us);
        SyncedFrame {
            pts_us,
            capture_ts_us: frame.capture_ts_us,
            seq: frame.seq,
            keyframe: frame.keyframe,
            arrival: frame.arrival,
            data: frame.data,
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Frames waiting in the jitter buffers
    pub fn buffered(&self) -> (usize, usize) {
        (self.video.len(), self.audio.len())
    }
}
