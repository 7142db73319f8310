//! Retry policy applied by the step executor to unexpected step failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never zero.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            base_delay,
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed, Duration::ZERO)
    }

    /// Same backoff, different attempt budget (per-step override).
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.backoff, self.base_delay)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(n - 1)),
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, fixed 1s delay.
    fn default() -> Self {
        Self::new(3, Backoff::Fixed, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
        assert_eq!(RetryPolicy::new(0, Backoff::Fixed, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_delays_per_strategy() {
        let base = Duration::from_millis(100);
        let fixed = RetryPolicy::new(5, Backoff::Fixed, base);
        let linear = RetryPolicy::new(5, Backoff::Linear, base);
        let exp = RetryPolicy::new(5, Backoff::Exponential, base);

        assert_eq!(fixed.delay_after(3), Duration::from_millis(100));
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));
        assert_eq!(exp.delay_after(1), Duration::from_millis(100));
        assert_eq!(exp.delay_after(4), Duration::from_millis(800));
    }
}
