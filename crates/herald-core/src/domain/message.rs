//! Message - キューを流れる message レコード
//!
//! status は下の遷移メソッド経由でしか変わりません。各メソッドは
//! [`MessageStatus::can_transition_to`] で遷移を検査し、順序違反の更新は
//! [`TransitionError`] になります。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{TransitionError, ValidationError};
use super::ids::{MessageId, OrganizationId};
use super::status::MessageStatus;

/// Priority lane a message is dispatched from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLane {
    High,
    #[default]
    Normal,
    Low,
}

impl PriorityLane {
    /// The order an idle worker checks lanes in.
    pub const DISPATCH_ORDER: [PriorityLane; 3] =
        [PriorityLane::High, PriorityLane::Normal, PriorityLane::Low];

    /// Position in `DISPATCH_ORDER` (0 = highest).
    pub fn index(self) -> usize {
        match self {
            PriorityLane::High => 0,
            PriorityLane::Normal => 1,
            PriorityLane::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLane::High => "high",
            PriorityLane::Normal => "normal",
            PriorityLane::Low => "low",
        }
    }
}

impl fmt::Display for PriorityLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLane {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(PriorityLane::High),
            "normal" => Ok(PriorityLane::Normal),
            "low" => Ok(PriorityLane::Low),
            _ => Err(ValidationError::UnknownPriority(s.to_string())),
        }
    }
}

/// Opaque content handed to the delivery provider.
///
/// The queue only checks that it is not empty; the format belongs to the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        body: String,
    },
    Media {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Template {
        name: String,
        language: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        parameters: Vec<String>,
    },
}

impl Payload {
    pub fn text(body: impl Into<String>) -> Self {
        Payload::Text { body: body.into() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text { body } => body.trim().is_empty(),
            Payload::Media { url, .. } => url.trim().is_empty(),
            Payload::Template { name, .. } => name.trim().is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::Media { .. } => "media",
            Payload::Template { .. } => "template",
        }
    }
}

/// An outbound message and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    organization_id: OrganizationId,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde(default)]
    priority: PriorityLane,
    status: MessageStatus,
    #[serde(default)]
    retry_count: u32,
    max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Default retry ceiling until a producer stamps its own.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(
        id: impl Into<MessageId>,
        organization_id: impl Into<OrganizationId>,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            payload: Some(payload),
            priority: PriorityLane::default(),
            status: MessageStatus::Pending,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            scheduled_at: None,
            last_attempt_at: None,
            sent_at: None,
            last_error: None,
            created_at,
        }
    }

    /// Lane used when the message is scheduled rather than enqueued.
    pub fn with_priority(mut self, priority: PriorityLane) -> Self {
        self.priority = priority;
        self
    }

    /// Drop the payload (mostly useful for exercising validation).
    pub fn without_payload(mut self) -> Self {
        self.payload = None;
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn priority(&self) -> PriorityLane {
        self.priority
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Admission checks shared by every producer entry point.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.organization_id.is_empty() {
            return Err(ValidationError::MissingOrganization {
                message_id: self.id.clone(),
            });
        }
        match &self.payload {
            None => Err(ValidationError::MissingPayload {
                message_id: self.id.clone(),
            }),
            Some(payload) if payload.is_empty() => Err(ValidationError::EmptyPayload {
                message_id: self.id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Reset bookkeeping for a fresh admission into `priority`'s lane.
    pub fn admit(&mut self, priority: PriorityLane, max_retries: u32) {
        self.priority = priority;
        self.status = MessageStatus::Pending;
        self.retry_count = 0;
        self.max_retries = max_retries;
        self.scheduled_at = None;
        self.last_attempt_at = None;
        self.sent_at = None;
        self.last_error = None;
    }

    /// Reset bookkeeping for a fresh admission into the scheduled index.
    pub fn schedule_for(&mut self, due_at: DateTime<Utc>, max_retries: u32) {
        let priority = self.priority;
        self.admit(priority, max_retries);
        self.status = MessageStatus::Scheduled;
        self.scheduled_at = Some(due_at);
    }

    /// Scheduled -> Pending, once the due time has passed.
    pub fn promote(&mut self) -> Result<(), TransitionError> {
        self.transition(MessageStatus::Pending)?;
        self.scheduled_at = None;
        Ok(())
    }

    /// Pending -> Sending.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(MessageStatus::Sending)?;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    /// Sending -> Sent.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(MessageStatus::Sent)?;
        self.sent_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// Sending -> Failed, remembering why.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(MessageStatus::Failed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Failed -> Pending; the caller re-pushes onto the lane after the delay.
    pub fn retry_in_lane(&mut self, retry_count: u32) -> Result<(), TransitionError> {
        self.check_retry_count(retry_count)?;
        self.transition(MessageStatus::Pending)?;
        self.retry_count = retry_count;
        Ok(())
    }

    /// Failed -> Scheduled with `scheduled_at = due_at`.
    pub fn retry_scheduled(
        &mut self,
        retry_count: u32,
        due_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check_retry_count(retry_count)?;
        self.transition(MessageStatus::Scheduled)?;
        self.retry_count = retry_count;
        self.scheduled_at = Some(due_at);
        Ok(())
    }

    /// Failed -> Dead.
    pub fn mark_dead(&mut self, retry_count: u32) -> Result<(), TransitionError> {
        self.check_retry_count(retry_count)?;
        self.transition(MessageStatus::Dead)?;
        self.retry_count = retry_count;
        Ok(())
    }

    fn check_retry_count(&self, retry_count: u32) -> Result<(), TransitionError> {
        if retry_count > self.max_retries {
            return Err(TransitionError::RetryLimitExceeded {
                id: self.id.clone(),
                retry_count,
                max_retries: self.max_retries,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: MessageStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
