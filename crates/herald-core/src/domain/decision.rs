//! Decision - 配送失敗後の次の一手（retry / dead-letter）
//!
//! Decider は message のリトライ情報と失敗内容だけを見る純粋関数です。
//! 判断の適用（状態遷移、再投入、デッドレター）は dispatcher の責務です。

use std::fmt;
use std::time::Duration;

use super::message::Message;
use super::outcome::DeliveryError;
use crate::policy::RetryPolicy;

/// Where a retried message waits out its delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRoute {
    /// In-process timer, then straight back onto the original lane.
    Lane,
    /// Scheduled index with `scheduled_at = now + delay`; the sweep promotes it.
    Scheduled,
}

/// Why a message ended up in the dead-letter lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    RetriesExhausted { attempts: u32 },
    NonRecoverable { reason: String },
}

impl DeadLetterReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DeadLetterReason::RetriesExhausted { .. } => "retries_exhausted",
            DeadLetterReason::NonRecoverable { .. } => "non_recoverable",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
            DeadLetterReason::NonRecoverable { reason } => write!(f, "non-recoverable: {reason}"),
        }
    }
}

/// The next step for a message whose attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Re-enqueue after `delay` with the incremented `retry_count`.
    Retry {
        retry_count: u32,
        delay: Duration,
        route: RetryRoute,
    },

    /// Give up. `retry_count` is what the record should carry once dead.
    DeadLetter {
        retry_count: u32,
        reason: DeadLetterReason,
    },
}

pub trait Decider: Send + Sync {
    fn decide(&self, message: &Message, error: &DeliveryError) -> Decision;
}

/// Exponential-backoff decider.
///
/// - non-recoverable failure: dead-letter immediately, `retry_count` untouched
/// - `retry_count + 1 >= max_retries`: dead-letter with `retry_count = max_retries`
/// - otherwise: retry with `retry_count + 1` after `policy.delay_for(retry_count + 1)`
#[derive(Debug, Clone, Default)]
pub struct BackoffDecider {
    policy: RetryPolicy,
}

impl BackoffDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Decider for BackoffDecider {
    fn decide(&self, message: &Message, error: &DeliveryError) -> Decision {
        if let DeliveryError::NonRecoverable { reason } = error {
            return Decision::DeadLetter {
                retry_count: message.retry_count(),
                reason: DeadLetterReason::NonRecoverable {
                    reason: reason.clone(),
                },
            };
        }

        let next = message.retry_count().saturating_add(1);
        if next >= message.max_retries() {
            return Decision::DeadLetter {
                retry_count: message.max_retries(),
                reason: DeadLetterReason::RetriesExhausted {
                    attempts: message.max_retries(),
                },
            };
        }

        let delay = self.policy.delay_for(next);
        Decision::Retry {
            retry_count: next,
            delay,
            route: self.policy.route_for(delay),
        }
    }
}
