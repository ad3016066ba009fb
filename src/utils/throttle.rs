//! Log throttling for per-frame warnings
//!
//! A camera on a lossy link can produce the same warning for every packet.
//! The throttler lets one message per key through each interval and counts
//! what it swallowed in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message is logged
///
/// ```rust
/// use omt_bridge::utils::LogThrottler;
///
/// let throttler = LogThrottler::with_secs(5);
/// assert_eq!(throttler.admit("video_gap"), Some(0));
/// assert_eq!(throttler.admit("video_gap"), None);
/// ```
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when the message should be logged now,
    /// where `suppressed` is how many were swallowed since the last one
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = std::mem::take(&mut state.suppressed);
                state.last_logged = now;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use omt_bridge::utils::LogThrottler;
/// use omt_bridge::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "decode", "Decode error: {}", "bad slice");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.admit($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling_counts_suppressed() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert_eq!(throttler.admit("gap"), Some(0));
        assert_eq!(throttler.admit("gap"), None);
        assert_eq!(throttler.admit("gap"), None);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(throttler.admit("gap"), Some(2));
        assert_eq!(throttler.admit("gap"), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert_eq!(throttler.admit("video"), Some(0));
        assert_eq!(throttler.admit("audio"), Some(0));
        assert_eq!(throttler.admit("video"), None);
    }

    #[test]
    fn test_macro_expands() {
        let throttler = LogThrottler::default();
        warn_throttled!(throttler, "k", "value {}", 1);
        warn_throttled!(throttler, "k", "value {}", 2);
        assert_eq!(throttler.admit("k"), None);
    }
}
