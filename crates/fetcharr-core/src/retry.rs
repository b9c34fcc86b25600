//! Exponential backoff with full jitter.
//!
//! Shared by the gateway client (429/5xx retries) and the job manager
//! (transient download failures). The `attempt` counter is 1-based and
//! resets whenever the job makes byte progress.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy with full jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next retry, or `None` once attempts are exhausted.
    ///
    /// The delay is drawn uniformly from `0..=base * 2^(attempt-1)` capped at
    /// `max_delay` (full jitter).
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.delay_bound(attempt).mul_f64(rand::rng().random_range(0.0..=1.0)))
    }

    /// The deterministic ceiling the jittered delay is drawn from.
    #[must_use]
    pub fn delay_bound(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_doubles_until_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_bound(1), Duration::from_secs(2));
        assert_eq!(policy.delay_bound(2), Duration::from_secs(4));
        assert_eq!(policy.delay_bound(3), Duration::from_secs(8));
        assert_eq!(policy.delay_bound(6), Duration::from_secs(60));
        assert_eq!(policy.delay_bound(30), Duration::from_secs(60));
    }

    #[test]
    fn jittered_delay_stays_within_the_bound() {
        let policy = RetryPolicy::default();
        for attempt in 1..5 {
            for _ in 0..32 {
                let delay = policy.next_delay(attempt).expect("retry allowed");
                assert!(delay <= policy.delay_bound(attempt));
            }
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.next_delay(1).is_some());
        assert!(policy.next_delay(2).is_some());
        assert!(policy.next_delay(3).is_none());
    }
}
