//! Events - ドメインイベント
//!
//! message のライフサイクルに沿って EventSink へ送出されます。

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::decision::DeadLetterReason;
use super::ids::MessageId;
use super::message::PriorityLane;
use super::outcome::DeliveryReceipt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Enqueued {
        id: MessageId,
        priority: PriorityLane,
    },
    Scheduled {
        id: MessageId,
        due_at: DateTime<Utc>,
    },
    Promoted {
        id: MessageId,
        priority: PriorityLane,
    },
    Claimed {
        id: MessageId,
        priority: PriorityLane,
        worker: usize,
    },
    Sent {
        id: MessageId,
        receipt: DeliveryReceipt,
    },
    RetryScheduled {
        id: MessageId,
        retry_count: u32,
        delay: Duration,
    },
    DeadLettered {
        id: MessageId,
        retry_count: u32,
        reason: DeadLetterReason,
    },
}

impl DomainEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            DomainEvent::Enqueued { id, .. }
            | DomainEvent::Scheduled { id, .. }
            | DomainEvent::Promoted { id, .. }
            | DomainEvent::Claimed { id, .. }
            | DomainEvent::Sent { id, .. }
            | DomainEvent::RetryScheduled { id, .. }
            | DomainEvent::DeadLettered { id, .. } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Enqueued { .. } => "enqueued",
            DomainEvent::Scheduled { .. } => "scheduled",
            DomainEvent::Promoted { .. } => "promoted",
            DomainEvent::Claimed { .. } => "claimed",
            DomainEvent::Sent { .. } => "sent",
            DomainEvent::RetryScheduled { .. } => "retry_scheduled",
            DomainEvent::DeadLettered { .. } => "dead_lettered",
        }
    }
}
