//! Process-wide fallback mode
//!
//! While active, cameras keep connecting and decoding but no sender opens.
//! Recovery is retried on a fixed interval.

use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug)]
pub struct FallbackPolicy {
    retry_interval: Duration,
    active: bool,
    reason: Option<String>,
    next_retry: Option<Instant>,
    attempts: u32,
}

impl FallbackPolicy {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval,
            active: false,
            reason: None,
            next_retry: None,
            attempts: 0,
        }
    }

    /// Enter fallback mode; returns false if it was already active
    pub fn enter(&mut self, reason: impl Into<String>, now: Instant) -> bool {
        let reason = reason.into();
        if self.active {
            return false;
        }
        warn!(
            "Entering fallback mode, retrying every {:?}: {}",
            self.retry_interval, reason
        );
        self.active = true;
        self.reason = Some(reason);
        self.attempts = 0;
        self.next_retry = Some(now + self.retry_interval);
        true
    }

    pub fn retry_due(&self, now: Instant) -> bool {
        self.active && self.next_retry.is_some_and(|at| now >= at)
    }

    /// A recovery attempt failed; schedule the next one
    pub fn retry_failed(&mut self, reason: impl Into<String>, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.reason = Some(reason.into());
        self.next_retry = Some(now + self.retry_interval);
    }

    /// Leave fallback mode; returns false if it was not active
    pub fn leave(&mut self) -> bool {
        if !self.active {
            return false;
        }
        info!("Leaving fallback mode after {} failed retries", self.attempts);
        self.active = false;
        self.reason = None;
        self.next_retry = None;
        self.attempts = 0;
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_once() {
        let now = Instant::now();
        let mut policy = FallbackPolicy::new(Duration::from_secs(10));
        assert!(policy.enter("library missing", now));
        assert!(!policy.enter("again", now));
        assert_eq!(policy.reason(), Some("library missing"));
    }

    #[test]
    fn test_retry_schedule() {
        let now = Instant::now();
        let mut policy = FallbackPolicy::new(Duration::from_secs(10));
        assert!(!policy.retry_due(now + Duration::from_secs(60)));

        policy.enter("down", now);
        assert!(!policy.retry_due(now + Duration::from_secs(9)));
        assert!(policy.retry_due(now + Duration::from_secs(10)));

        let later = now + Duration::from_secs(10);
        policy.retry_failed("still down", later);
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.retry_due(later + Duration::from_secs(5)));
        assert!(policy.retry_due(later + Duration::from_secs(10)));

        assert!(policy.leave());
        assert!(!policy.leave());
        assert!(!policy.is_active());
        assert!(!policy.retry_due(later + Duration::from_secs(100)));
    }
}
