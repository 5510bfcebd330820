//! Retry delay between reconnection attempts.

use std::time::Duration;

/// Attempts made before an episode is declared lost.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first attempt.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Exponential backoff: `base * 2^attempt`.
///
/// Only computes delays. Deciding when to stop is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub const fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay to wait before attempt number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..MAX_RECONNECT_ATTEMPTS)
            .map(|a| backoff.delay(a).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn custom_base() {
        let backoff = Backoff::new(Duration::from_millis(250));
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(
            Backoff::default().delay(200),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }
}
