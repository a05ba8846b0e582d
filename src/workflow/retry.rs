//! Retry Policy
//!
//! Strategy and bounds governing re-attempts of a failed step.
//!
//! Delay functions (attempt index starting at 0):
//!
//! | Strategy             | Delay                                 |
//! |----------------------|---------------------------------------|
//! | `none`               | 0                                     |
//! | `fixed_delay`        | constant (default 2s)                 |
//! | `exponential_backoff`| min(2^attempt, cap) (default cap 30s) |
//! | `linear_backoff`     | min(base * (attempt+1), cap) (2s, 20s)|

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_FIXED_DELAY_SECS: u64 = 2;
pub const DEFAULT_EXPONENTIAL_CAP_SECS: u64 = 30;
pub const DEFAULT_LINEAR_BASE_SECS: u64 = 2;
pub const DEFAULT_LINEAR_CAP_SECS: u64 = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How the delay between attempts grows.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    FixedDelay,
    #[default]
    ExponentialBackoff,
    LinearBackoff,
}

/// Retry configuration attached to a step.
///
/// Serialized with the flat keys used by template files:
/// `retry_strategy`, `max_retries`, `timeout_seconds`, and optionally
/// `retry_delay_seconds` / `retry_max_delay_seconds` to override the
/// strategy's defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    #[serde(default)]
    pub retry_strategy: RetryStrategy,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_seconds: Option<u64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_strategy: RetryStrategy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            retry_delay_seconds: None,
            retry_max_delay_seconds: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_strategy: RetryStrategy, max_retries: u32, timeout_seconds: u64) -> Self {
        Self {
            retry_strategy,
            max_retries,
            timeout_seconds,
            retry_delay_seconds: None,
            retry_max_delay_seconds: None,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry(timeout_seconds: u64) -> Self {
        Self::new(RetryStrategy::None, 0, timeout_seconds)
    }

    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.retry_delay_seconds = Some(seconds);
        self
    }

    pub fn with_max_delay(mut self, seconds: u64) -> Self {
        self.retry_max_delay_seconds = Some(seconds);
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Delay to wait before the retry following failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.retry_strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::FixedDelay => Duration::from_secs(
                self.retry_delay_seconds.unwrap_or(DEFAULT_FIXED_DELAY_SECS),
            ),
            RetryStrategy::ExponentialBackoff => {
                let cap = self
                    .retry_max_delay_seconds
                    .unwrap_or(DEFAULT_EXPONENTIAL_CAP_SECS);
                let raw = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
                Duration::from_secs(raw.min(cap))
            }
            RetryStrategy::LinearBackoff => {
                let base = self.retry_delay_seconds.unwrap_or(DEFAULT_LINEAR_BASE_SECS);
                let cap = self
                    .retry_max_delay_seconds
                    .unwrap_or(DEFAULT_LINEAR_CAP_SECS);
                let raw = base.saturating_mul(u64::from(attempt) + 1);
                Duration::from_secs(raw.min(cap))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(d: Duration) -> u64 {
        d.as_secs()
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = RetryPolicy::new(RetryStrategy::ExponentialBackoff, 10, 30);
        assert_eq!(secs(policy.delay(0)), 1);
        assert_eq!(secs(policy.delay(1)), 2);
        assert_eq!(secs(policy.delay(3)), 8);
        assert_eq!(secs(policy.delay(4)), 16);
        assert_eq!(secs(policy.delay(6)), 30);
        assert_eq!(secs(policy.delay(200)), 30);
    }

    #[test]
    fn test_linear_backoff_delays() {
        let policy = RetryPolicy::new(RetryStrategy::LinearBackoff, 10, 30);
        assert_eq!(secs(policy.delay(0)), 2);
        assert_eq!(secs(policy.delay(1)), 4);
        assert_eq!(secs(policy.delay(9)), 20);
        assert_eq!(secs(policy.delay(50)), 20);
    }

    #[test]
    fn test_fixed_and_none_delays() {
        let fixed = RetryPolicy::new(RetryStrategy::FixedDelay, 3, 30);
        assert_eq!(secs(fixed.delay(0)), 2);
        assert_eq!(secs(fixed.delay(5)), 2);

        let none = RetryPolicy::new(RetryStrategy::None, 3, 30);
        assert_eq!(none.delay(4), Duration::ZERO);
    }

    #[test]
    fn test_overridden_delays() {
        let fixed = RetryPolicy::new(RetryStrategy::FixedDelay, 3, 30).with_delay(5);
        assert_eq!(secs(fixed.delay(2)), 5);

        let linear = RetryPolicy::new(RetryStrategy::LinearBackoff, 3, 30)
            .with_delay(3)
            .with_max_delay(7);
        assert_eq!(secs(linear.delay(0)), 3);
        assert_eq!(secs(linear.delay(1)), 6);
        assert_eq!(secs(linear.delay(2)), 7);
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::no_retry(10).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(RetryStrategy::FixedDelay, 2, 10).max_attempts(), 3);
    }

    #[test]
    fn test_strategy_yaml_names() {
        let policy: RetryPolicy = serde_yaml::from_str(
            "retry_strategy: linear_backoff\nmax_retries: 1\ntimeout_seconds: 5\n",
        )
        .unwrap();
        assert_eq!(policy.retry_strategy, RetryStrategy::LinearBackoff);
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.timeout_seconds, 5);
    }

    #[test]
    fn test_policy_defaults_when_omitted() {
        let policy: RetryPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
    }
}
