//! Lock-free per-session counters
//!
//! Written by the session's reader and decode worker, read by the supervisor
//! on every health tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::MediaKind;

/// Samples after which the latency average turns into a moving average
const LATENCY_WINDOW: u64 = 64;

/// Serializable copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCounters {
    pub bytes_received: u64,
    pub messages_received: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub video_decoded: u64,
    pub audio_decoded: u64,
    pub frames_dropped: u64,
    pub degraded_faults: u64,
    pub frames_sent: u64,
    pub frames_previewed: u64,
    pub audio_sync_dropped: u64,
    /// Arrival to hand-off delay of the last delivered frame
    pub latency_us: u64,
    /// Smoothed arrival to hand-off delay
    pub latency_avg_us: u64,
    pub latency_samples: u64,
}

impl SlotCounters {
    /// Decoded audio blocks per decoded picture, once video is flowing
    pub fn audio_video_ratio(&self) -> Option<f64> {
        (self.video_decoded > 0).then(|| self.audio_decoded as f64 / self.video_decoded as f64)
    }

    pub fn megabytes_received(&self) -> f64 {
        self.bytes_received as f64 / (1024.0 * 1024.0)
    }
}

/// Shared counters of one session
pub struct SessionCounters {
    epoch: Instant,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
    video_packets: AtomicU64,
    audio_packets: AtomicU64,
    video_decoded: AtomicU64,
    audio_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    degraded_faults: AtomicU64,
    frames_sent: AtomicU64,
    frames_previewed: AtomicU64,
    audio_sync_dropped: AtomicU64,
    latency_us: AtomicU64,
    latency_avg_us: AtomicU64,
    latency_samples: AtomicU64,
    /// Milliseconds since `epoch` of the last received message
    last_activity_ms: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            bytes_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            video_packets: AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            video_decoded: AtomicU64::new(0),
            audio_decoded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            degraded_faults: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_previewed: AtomicU64::new(0),
            audio_sync_dropped: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            latency_avg_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    /// Record one wire message of `bytes` total size
    pub fn record_message(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_packet(&self, kind: MediaKind) {
        let counter = match kind {
            MediaKind::Video => &self.video_packets,
            MediaKind::Audio => &self.audio_packets,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last received message (or since creation)
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = self.epoch + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    /// Publish decoder totals; the worker owns these values
    pub fn store_decode(&self, video_decoded: u64, audio_decoded: u64, dropped: u64, degraded: u64) {
        self.video_decoded.store(video_decoded, Ordering::Relaxed);
        self.audio_decoded.store(audio_decoded, Ordering::Relaxed);
        self.frames_dropped.store(dropped, Ordering::Relaxed);
        self.degraded_faults.store(degraded, Ordering::Relaxed);
    }

    pub fn store_sync_dropped(&self, audio_dropped: u64) {
        self.audio_sync_dropped.store(audio_dropped, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_previewed(&self) {
        self.frames_previewed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a delivered frame spent between arrival and hand-off
    ///
    /// Only the decode worker writes these, so load then store is enough.
    pub fn record_latency(&self, latency: Duration) {
        let sample = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let samples = self.latency_samples.fetch_add(1, Ordering::Relaxed);
        let avg = if samples == 0 {
            sample
        } else {
            let prev = self.latency_avg_us.load(Ordering::Relaxed);
            let weight = (samples + 1).min(LATENCY_WINDOW);
            ((prev as u128 * (weight - 1) as u128 + sample as u128) / weight as u128) as u64
        };
        self.latency_us.store(sample, Ordering::Relaxed);
        self.latency_avg_us.store(avg, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SlotCounters {
        SlotCounters {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            video_packets: self.video_packets.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            video_decoded: self.video_decoded.load(Ordering::Relaxed),
            audio_decoded: self.audio_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            degraded_faults: self.degraded_faults.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_previewed: self.frames_previewed.load(Ordering::Relaxed),
            audio_sync_dropped: self.audio_sync_dropped.load(Ordering::Relaxed),
            latency_us: self.latency_us.load(Ordering::Relaxed),
            latency_avg_us: self.latency_avg_us.load(Ordering::Relaxed),
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accounting() {
        let counters = SessionCounters::new();
        counters.record_message(100);
        counters.record_message(22);
        counters.record_packet(MediaKind::Video);
        counters.record_sent();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.bytes_received, 122);
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.video_packets, 1);
        assert_eq!(snapshot.audio_packets, 0);
        assert_eq!(snapshot.frames_sent, 1);
    }

    #[test]
    fn test_idle_tracking() {
        let counters = SessionCounters::new();
        let later = Instant::now() + Duration::from_secs(5);
        assert!(counters.idle_for(later) >= Duration::from_secs(4));

        counters.touch();
        assert!(counters.idle_for(Instant::now()) < Duration::from_secs(1));
    }

    #[test]
    fn test_latency_average() {
        let counters = SessionCounters::new();
        assert_eq!(counters.snapshot().latency_samples, 0);

        counters.record_latency(Duration::from_millis(10));
        counters.record_latency(Duration::from_millis(30));
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.latency_samples, 2);
        assert_eq!(snapshot.latency_us, 30_000);
        assert_eq!(snapshot.latency_avg_us, 20_000);

        // Old samples fade once the window is full
        for _ in 0..1000 {
            counters.record_latency(Duration::from_millis(5));
        }
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.latency_us, 5_000);
        assert!(snapshot.latency_avg_us < 6_000);
    }

    #[test]
    fn test_derived_rates() {
        let mut counters = SlotCounters::default();
        assert_eq!(counters.audio_video_ratio(), None);

        counters.video_decoded = 30;
        counters.audio_decoded = 45;
        counters.bytes_received = 3 * 1024 * 1024;
        assert_eq!(counters.audio_video_ratio(), Some(1.5));
        assert_eq!(counters.megabytes_received(), 3.0);
    }
}
