//! Reconnect backoff policy.
//!
//! Pure exponential backoff with a ceiling and a bounded attempt budget,
//! no jitter. With the defaults the delays run 1s, 2s, 4s, 8s, 16s, then
//! 30s for the remaining attempts, ten in total, after which the session
//! goes dormant until an explicit subscribe or a host signal revives it.

use std::time::Duration;

/// Default maximum number of automatic reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default first-retry delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default delay ceiling.
pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff with cap and attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for the computed delay.
    pub cap: Duration,
    /// Attempts after which no further timer is armed.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt given the number of failures so far,
    /// or `None` once the budget is spent.
    pub fn delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_sequence() {
        let policy = ReconnectPolicy::default();
        let expected_ms = [
            1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000,
        ];

        for (attempts, expected) in expected_ms.iter().enumerate() {
            assert_eq!(
                policy.delay(attempts as u32),
                Some(Duration::from_millis(*expected)),
                "attempt {attempts}"
            );
        }
    }

    #[test]
    fn budget_exhausts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(10), None);
        assert_eq!(policy.delay(u32::MAX), None);
    }

    #[test]
    fn cap_applies() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(2),
            max_attempts: 20,
        };
        assert_eq!(policy.delay(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(19), Some(Duration::from_secs(2)));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = ReconnectPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 64,
        };
        assert_eq!(policy.delay(63), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(0), None);
    }
}
