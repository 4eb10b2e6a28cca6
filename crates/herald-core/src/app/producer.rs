//! Producer - 受付（admission）
//!
//! 受付時のエラーは呼び出し元へ同期的に返します。配送時のエラーはここには
//! 現れません。

use std::future::Future;

use chrono::{DateTime, Utc};

use super::context::AppContext;
use crate::config::ProducerConfig;
use crate::domain::{
    DomainEvent, HeraldError, Message, MessageId, OrganizationId, Payload, PriorityLane,
    ValidationError,
};
use crate::ports::StoreError;
use crate::ports::metrics_sink::names;

/// Per-item result of [`Producer::enqueue_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub admitted: Vec<MessageId>,
    pub rejected: Vec<BatchRejection>,
}

#[derive(Debug)]
pub struct BatchRejection {
    /// Position in the submitted batch.
    pub index: usize,
    pub id: MessageId,
    pub error: HeraldError,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.admitted.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Producer {
    ctx: AppContext,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(ctx: AppContext, config: ProducerConfig) -> Self {
        Self { ctx, config }
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Build a message with a producer-assigned id.
    pub fn compose(&self, organization_id: impl Into<OrganizationId>, payload: Payload) -> Message {
        let now = self.ctx.clock.now();
        Message::new(MessageId::generate_at(now), organization_id, payload, now)
    }

    /// Validate and append to the tail of `priority`'s lane.
    pub async fn enqueue(
        &self,
        mut message: Message,
        priority: PriorityLane,
    ) -> Result<MessageId, HeraldError> {
        if let Err(err) = message.validate() {
            self.count(names::ENQUEUED_TOTAL, priority, "invalid");
            return Err(err.into());
        }

        message.admit(priority, self.config.max_retries);
        let id = message.id().clone();

        if let Err(err) = self
            .with_admission_retry(&id, || self.ctx.store.push(message.clone()))
            .await
        {
            self.count(names::ENQUEUED_TOTAL, priority, "store_error");
            return Err(err.into());
        }

        self.count(names::ENQUEUED_TOTAL, priority, "ok");
        self.ctx
            .events
            .emit(DomainEvent::Enqueued { id: id.clone(), priority });
        tracing::debug!(message_id = %id, priority = %priority, "message enqueued");
        Ok(id)
    }

    /// Admit each message independently.
    ///
    /// The size ceiling and the empty check reject the whole batch up front;
    /// after that a bad item is recorded in the report and does not stop the
    /// rest.
    pub async fn enqueue_batch(
        &self,
        messages: Vec<Message>,
        priority: PriorityLane,
    ) -> Result<BatchReport, HeraldError> {
        if messages.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        if messages.len() > self.config.max_batch_size {
            tracing::warn!(
                size = messages.len(),
                limit = self.config.max_batch_size,
                "batch rejected: too large"
            );
            return Err(HeraldError::BatchTooLarge {
                size: messages.len(),
                limit: self.config.max_batch_size,
            });
        }

        let mut report = BatchReport::default();
        for (index, message) in messages.into_iter().enumerate() {
            let id = message.id().clone();
            match self.enqueue(message, priority).await {
                Ok(id) => report.admitted.push(id),
                Err(error) => report.rejected.push(BatchRejection { index, id, error }),
            }
        }

        tracing::info!(
            priority = %priority,
            admitted = report.admitted.len(),
            rejected = report.rejected.len(),
            "batch enqueued"
        );
        Ok(report)
    }

    /// Hold the message in the scheduled index until `due_at`.
    ///
    /// The message keeps its own priority (see [`Message::with_priority`]);
    /// the sweep pushes it onto that lane once due.
    pub async fn schedule(
        &self,
        mut message: Message,
        due_at: DateTime<Utc>,
    ) -> Result<MessageId, HeraldError> {
        let priority = message.priority();
        if let Err(err) = message.validate() {
            self.count(names::SCHEDULED_TOTAL, priority, "invalid");
            return Err(err.into());
        }

        let now = self.ctx.clock.now();
        if due_at <= now {
            self.count(names::SCHEDULED_TOTAL, priority, "invalid");
            return Err(HeraldError::InvalidSchedule { due_at, now });
        }

        message.schedule_for(due_at, self.config.max_retries);
        let id = message.id().clone();

        if let Err(err) = self
            .with_admission_retry(&id, || {
                self.ctx.store.add_scheduled(message.clone(), due_at)
            })
            .await
        {
            self.count(names::SCHEDULED_TOTAL, priority, "store_error");
            return Err(err.into());
        }

        self.count(names::SCHEDULED_TOTAL, priority, "ok");
        self.ctx.events.emit(DomainEvent::Scheduled {
            id: id.clone(),
            due_at,
        });
        tracing::debug!(message_id = %id, due_at = %due_at, "message scheduled");
        Ok(id)
    }

    /// Repeat a store call on transient errors, waiting `n * delay` after
    /// attempt `n`.
    async fn with_admission_retry<F, Fut>(&self, id: &MessageId, mut op: F) -> Result<(), StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let attempts = self.config.admission_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        message_id = %id,
                        attempt,
                        attempts,
                        error = %err,
                        "store call failed, retrying"
                    );
                    tokio::time::sleep(self.config.admission_retry_delay() * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn count(&self, name: &'static str, priority: PriorityLane, outcome: &str) {
        self.ctx
            .metrics
            .increment(name, &[("priority", priority.as_str()), ("outcome", outcome)]);
    }
}
