// src/engine/retry.rs

//! Retry policy and backoff computation.

use std::time::Duration;

/// How many times a task is attempted and how long to wait in between.
///
/// The delay before attempt `n + 1` is
/// `backoff_interval * backoff_multiplier^(n - 1)`, capped by `max_backoff`.
/// A multiplier of `1.0` gives a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_interval: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: None,
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval policy.
    pub fn fixed(max_attempts: u32, backoff_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_interval,
            ..Self::default()
        }
    }

    /// Exponential policy doubling (or `multiplier`-ing) the delay each time.
    pub fn exponential(max_attempts: u32, backoff_interval: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_interval,
            backoff_multiplier: multiplier,
            max_backoff: None,
        }
    }

    pub fn with_max_backoff(mut self, cap: Duration) -> Self {
        self.max_backoff = Some(cap);
        self
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.backoff_interval.as_secs_f64() * factor;
        let delay = if secs.is_finite() && secs < u64::MAX as f64 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::MAX
        };
        match self.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_keeps_interval() {
        let p = RetryPolicy::fixed(4, Duration::from_secs(300));
        assert_eq!(p.delay_after(1), Duration::from_secs(300));
        assert_eq!(p.delay_after(3), Duration::from_secs(300));
        assert!(p.allows_retry_after(3));
        assert!(!p.allows_retry_after(4));
    }

    #[test]
    fn exponential_policy_grows_and_caps() {
        let p = RetryPolicy::exponential(5, Duration::from_millis(100), 2.0)
            .with_max_backoff(Duration::from_millis(350));
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(350));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }
}
