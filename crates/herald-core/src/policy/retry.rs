//! RetryPolicy - バックオフ遅延と、リトライ待ちの置き場所
//!
//! - 遅延は `base_delay * 2^retry_count`、`max_delay` で頭打ち
//! - `inline_retry_max_delay` 以下ならプロセス内タイマーで lane に戻し、
//!   それを超えれば scheduled index で待たせる

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::domain::RetryRoute;

/// Exponential backoff settings.
///
/// `delay = min(base_delay * 2^retry_count, max_delay)`, optionally spread by
/// `±jitter_factor`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay unit; the first retry waits `2 * base_delay`.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Randomization in `[0.0, 1.0)`; 0 keeps delays exact.
    pub jitter_factor: f64,

    /// Delays up to this long wait on an in-process timer and go back onto the
    /// lane; longer ones go through the scheduled index.
    pub inline_retry_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            inline_retry_max_delay: Duration::ZERO,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
            inline_retry_max_delay: Duration::from_millis(config.inline_retry_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_count` (the already incremented count).
    ///
    /// With base_delay = 1s and no cap in reach:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exact = 1u32
            .checked_shl(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay));

        if self.jitter_factor <= 0.0 {
            return exact;
        }

        let secs = exact.as_secs_f64();
        let range = secs * self.jitter_factor.min(1.0);
        let jitter: f64 = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((secs + jitter).max(0.0)).min(self.max_delay)
    }

    pub fn route_for(&self, delay: Duration) -> RetryRoute {
        if delay <= self.inline_retry_max_delay {
            RetryRoute::Lane
        } else {
            RetryRoute::Scheduled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.jitter_factor, 0.0);
    }

    #[rstest]
    #[case::first_retry(1, 2_000)]
    #[case::second_retry(2, 4_000)]
    #[case::third_retry(3, 8_000)]
    #[case::capped(5, 30_000)]
    #[case::huge_exponent(64, 30_000)]
    fn exponential_backoff(#[case] retry_count: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(retry_count),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(3_200), "{delay:?}");
            assert!(delay <= Duration::from_millis(4_800), "{delay:?}");
        }
    }

    #[test]
    fn short_delays_stay_in_lane_when_enabled() {
        let policy = RetryPolicy {
            inline_retry_max_delay: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.route_for(Duration::from_millis(500)), RetryRoute::Lane);
        assert_eq!(
            policy.route_for(Duration::from_millis(501)),
            RetryRoute::Scheduled
        );

        let default = RetryPolicy::default();
        assert_eq!(
            default.route_for(Duration::from_millis(1)),
            RetryRoute::Scheduled
        );
    }
}
