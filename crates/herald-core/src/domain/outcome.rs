//! Outcome - 1 回の配送試行の結果
//!
//! 失敗は 2 種類に分類します。
//! - プロバイダの拒否: プロバイダ自身の `recoverable` フラグに従う
//! - それ以外（transport エラー、timeout、circuit open）: 常に recoverable

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::ProviderError;

/// Provider acknowledgment for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-side message id, if the provider returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

impl DeliveryReceipt {
    pub fn with_provider_id(id: impl Into<String>) -> Self {
        Self {
            provider_message_id: Some(id.into()),
        }
    }
}

/// Where a recoverable failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The provider answered and said "try again".
    Provider,
    /// Connection-level failure before a provider verdict.
    Transport,
    /// The per-call timeout elapsed.
    Timeout,
    /// The circuit breaker rejected the call without reaching the provider.
    CircuitOpen,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::Provider => "provider",
            FailureCause::Transport => "transport",
            FailureCause::Timeout => "timeout",
            FailureCause::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recoverable delivery failure ({cause}): {reason}")]
    Recoverable { cause: FailureCause, reason: String },

    #[error("non-recoverable delivery failure: {reason}")]
    NonRecoverable { reason: String },
}

impl DeliveryError {
    pub fn recoverable(cause: FailureCause, reason: impl Into<String>) -> Self {
        DeliveryError::Recoverable {
            cause,
            reason: reason.into(),
        }
    }

    pub fn non_recoverable(reason: impl Into<String>) -> Self {
        DeliveryError::NonRecoverable {
            reason: reason.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeliveryError::Recoverable { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            DeliveryError::Recoverable { reason, .. } | DeliveryError::NonRecoverable { reason } => {
                reason
            }
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryError::Recoverable { cause, .. } => cause.as_str(),
            DeliveryError::NonRecoverable { .. } => "rejected",
        }
    }
}

impl From<ProviderError> for DeliveryError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected {
                recoverable: true,
                reason,
            } => DeliveryError::recoverable(FailureCause::Provider, reason),
            ProviderError::Rejected {
                recoverable: false,
                reason,
            } => DeliveryError::non_recoverable(reason),
            ProviderError::Transport(reason) => {
                DeliveryError::recoverable(FailureCause::Transport, reason)
            }
        }
    }
}
