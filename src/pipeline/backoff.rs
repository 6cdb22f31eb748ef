//! Exponential reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Doubling delay, capped, with a bounded number of consecutive failures.
///
/// ```
/// use std::time::Duration;
/// use wanderfm::pipeline::Backoff;
///
/// let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(3), 4);
/// assert_eq!(b.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(b.next_delay(), Some(Duration::from_secs(2)));
/// assert_eq!(b.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(b.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(b.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap: cap.max(base),
            max_attempts,
            failures: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once `max_attempts` consecutive failures have been used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.failures >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.failures += 1;
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Forget past failures; the next delay is `base` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
