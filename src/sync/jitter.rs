//! Bounded jitter buffer ordered by capture timestamp

use std::collections::BTreeMap;

use crate::decoder::DecodedFrame;

/// Frames of one media kind, ordered by capture time
///
/// Frames with equal timestamps keep their insertion order. When full, the
/// oldest frame is evicted to make room.
pub struct JitterBuffer {
    frames: BTreeMap<(u64, u64), DecodedFrame>,
    capacity: usize,
    next_insert: u64,
}

impl JitterBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity: capacity.max(1),
            next_insert: 0,
        }
    }

    /// Insert a frame; returns the evicted frame if the buffer was full
    pub fn push(&mut self, frame: DecodedFrame) -> Option<DecodedFrame> {
        let key = (frame.capture_ts_us, self.next_insert);
        self.next_insert += 1;
        self.frames.insert(key, frame);

        if self.frames.len() > self.capacity {
            self.frames.pop_first().map(|(_, evicted)| evicted)
        } else {
            None
        }
    }

    /// Capture timestamp of the oldest frame
    pub fn front_ts(&self) -> Option<u64> {
        self.frames.keys().next().map(|(ts, _)| *ts)
    }

    pub fn pop(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_first().map(|(_, frame)| frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
