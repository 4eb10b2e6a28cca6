//! Errors - エラー型と分類
//!
//! - 受付エラー（`HeraldError`）は呼び出し元へ同期的に返す
//! - 配送エラー（`outcome` の `DeliveryError`）は呼び出し元には返らず、
//!   リトライ判断を駆動し、status・イベント・メトリクスに現れる

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::ids::MessageId;
use super::status::MessageStatus;
use crate::ports::StoreError;

/// Malformed input rejected at admission. Never enqueued, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message id is required")]
    MissingId,

    #[error("organization id is required (message {message_id})")]
    MissingOrganization { message_id: MessageId },

    #[error("payload is required (message {message_id})")]
    MissingPayload { message_id: MessageId },

    #[error("payload is empty (message {message_id})")]
    EmptyPayload { message_id: MessageId },

    #[error("batch contains no messages")]
    EmptyBatch,

    #[error("unknown priority: {0}")]
    UnknownPriority(String),
}

/// Errors returned by the producer's admission operations.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("batch of {size} messages exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("scheduled time {due_at} is not in the future (now {now})")]
    InvalidSchedule {
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("queue store error: {0}")]
    Store(#[from] StoreError),
}

impl HeraldError {
    /// Would the same call succeed if repeated later?
    pub fn is_retryable(&self) -> bool {
        match self {
            HeraldError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("message {id}: illegal transition {from} -> {to}")]
    Illegal {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("message {id}: retry count {retry_count} exceeds max retries {max_retries}")]
    RetryLimitExceeded {
        id: MessageId,
        retry_count: u32,
        max_retries: u32,
    },
}
