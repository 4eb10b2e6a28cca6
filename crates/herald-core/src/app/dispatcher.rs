//! Dispatcher - 1 件の配送試行（claim → send → decide → persist）
//!
//! # フロー
//! 1. レーンを順に `pop_front`（pop そのものが claim）
//! 2. `sending` に遷移し、circuit breaker + timeout 付きでプロバイダを呼ぶ
//! 3. 失敗なら Decider に判断を委ね、retry / dead-letter をストアへ反映
//!
//! 配送時のエラーは呼び出し元には返りません。status・イベント・メトリクスで
//! 観測します。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::context::AppContext;
use super::lanes::LaneCursor;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::domain::{
    DeadLetterReason, Decider, Decision, DeliveryError, DeliveryReceipt, DomainEvent,
    FailureCause, Message, MessageId, RetryRoute,
};
use crate::ports::metrics_sink::names;
use crate::ports::{DeliveryProvider, StoreError};

/// What happened to a claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        id: MessageId,
        receipt: DeliveryReceipt,
    },
    Retrying {
        id: MessageId,
        retry_count: u32,
        delay: Duration,
        route: RetryRoute,
    },
    DeadLettered {
        id: MessageId,
        retry_count: u32,
        reason: DeadLetterReason,
    },
}

impl DispatchOutcome {
    pub fn id(&self) -> &MessageId {
        match self {
            DispatchOutcome::Sent { id, .. }
            | DispatchOutcome::Retrying { id, .. }
            | DispatchOutcome::DeadLettered { id, .. } => id,
        }
    }
}

pub struct Dispatcher {
    ctx: AppContext,
    provider: Arc<dyn DeliveryProvider>,
    breaker: Arc<CircuitBreaker>,
    decider: Arc<dyn Decider>,
    send_timeout: Duration,
    /// Wait between persistence attempts while the store is down.
    persist_interval: Duration,
    /// In-process retry timers for `RetryRoute::Lane`.
    timers: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(
        ctx: AppContext,
        provider: Arc<dyn DeliveryProvider>,
        breaker: Arc<CircuitBreaker>,
        decider: Arc<dyn Decider>,
        send_timeout: Duration,
        persist_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            provider,
            breaker,
            decider,
            send_timeout,
            persist_interval,
            timers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Pop the first message found in `cursor`'s lane order and process it.
    ///
    /// `Ok(None)` means every lane was empty.
    pub async fn dispatch_next(
        &self,
        worker: usize,
        cursor: &mut LaneCursor,
    ) -> Result<Option<DispatchOutcome>, StoreError> {
        for lane in cursor.next_order() {
            if let Some(message) = self.ctx.store.pop_front(lane).await? {
                return Ok(Some(self.process(worker, message).await));
            }
        }
        Ok(None)
    }

    /// Run one delivery attempt for a message already removed from its lane.
    pub async fn process(&self, worker: usize, mut message: Message) -> DispatchOutcome {
        let id = message.id().clone();
        let priority = message.priority();

        if let Err(err) = message.claim(self.ctx.clock.now()) {
            tracing::error!(message_id = %id, worker, error = %err, "claimed message in unexpected state");
            let reason = DeadLetterReason::NonRecoverable {
                reason: err.to_string(),
            };
            return self.dead_letter_as_is(message, reason).await;
        }

        self.ctx.events.emit(DomainEvent::Claimed {
            id: id.clone(),
            priority,
            worker,
        });
        self.ctx
            .metrics
            .increment(names::ATTEMPTS_TOTAL, &[("priority", priority.as_str())]);
        tracing::debug!(message_id = %id, priority = %priority, worker, retry_count = message.retry_count(), "sending");

        match self.attempt(&message).await {
            Ok(receipt) => self.complete(message, receipt).await,
            Err(err) => self.fail(message, err).await,
        }
    }

    /// Provider call behind the breaker and the per-call timeout.
    async fn attempt(&self, message: &Message) -> Result<DeliveryReceipt, DeliveryError> {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                return Err(DeliveryError::recoverable(
                    FailureCause::CircuitOpen,
                    open.to_string(),
                ));
            }
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.send_timeout, self.provider.send(message)).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(err)) => Err(DeliveryError::from(err)),
            Err(_) => Err(DeliveryError::recoverable(
                FailureCause::Timeout,
                format!("no response within {}ms", self.send_timeout.as_millis()),
            )),
        };

        // a permanent rejection still proves the provider is reachable
        match &outcome {
            Err(err) if err.is_recoverable() => self.breaker.record_failure(permit),
            _ => self.breaker.record_success(permit),
        }

        let label = match &outcome {
            Ok(_) => "success",
            Err(err) => err.label(),
        };
        self.ctx.metrics.observe(
            names::SEND_DURATION_SECONDS,
            elapsed.as_secs_f64(),
            &[("priority", message.priority().as_str()), ("outcome", label)],
        );
        outcome
    }

    async fn complete(&self, mut message: Message, receipt: DeliveryReceipt) -> DispatchOutcome {
        let id = message.id().clone();
        let priority = message.priority();

        if let Err(err) = message.mark_sent(self.ctx.clock.now()) {
            tracing::error!(message_id = %id, error = %err, "failed to record delivery");
        }

        self.ctx
            .metrics
            .increment(names::SENT_TOTAL, &[("priority", priority.as_str())]);
        self.ctx.events.emit(DomainEvent::Sent {
            id: id.clone(),
            receipt: receipt.clone(),
        });
        tracing::info!(message_id = %id, priority = %priority, retry_count = message.retry_count(), "message sent");

        DispatchOutcome::Sent { id, receipt }
    }

    async fn fail(&self, mut message: Message, err: DeliveryError) -> DispatchOutcome {
        let id = message.id().clone();
        let priority = message.priority();

        self.ctx.metrics.increment(
            names::FAILURES_TOTAL,
            &[("priority", priority.as_str()), ("reason", err.label())],
        );

        if let Err(transition) = message.mark_failed(err.reason()) {
            tracing::error!(message_id = %id, error = %transition, "failed to record failure");
            let reason = DeadLetterReason::NonRecoverable {
                reason: transition.to_string(),
            };
            return self.dead_letter_as_is(message, reason).await;
        }

        match self.decider.decide(&message, &err) {
            Decision::Retry {
                retry_count,
                delay,
                route,
            } => self.retry(message, retry_count, delay, route, &err).await,
            Decision::DeadLetter {
                retry_count,
                reason,
            } => {
                if let Err(transition) = message.mark_dead(retry_count) {
                    tracing::error!(message_id = %id, error = %transition, "failed to mark message dead");
                }
                self.dead_letter_as_is(message, reason).await
            }
        }
    }

    async fn retry(
        &self,
        mut message: Message,
        retry_count: u32,
        delay: Duration,
        route: RetryRoute,
        err: &DeliveryError,
    ) -> DispatchOutcome {
        let id = message.id().clone();
        let priority = message.priority();

        let transition = match route {
            RetryRoute::Scheduled => {
                let due_at = due_after(self.ctx.clock.now(), delay);
                message
                    .retry_scheduled(retry_count, due_at)
                    .map(|()| due_at)
            }
            RetryRoute::Lane => message
                .retry_in_lane(retry_count)
                .map(|()| self.ctx.clock.now()),
        };
        let due_at = match transition {
            Ok(due_at) => due_at,
            Err(transition) => {
                tracing::error!(message_id = %id, error = %transition, "failed to record retry");
                let reason = DeadLetterReason::NonRecoverable {
                    reason: transition.to_string(),
                };
                return self.dead_letter_as_is(message, reason).await;
            }
        };

        tracing::warn!(
            message_id = %id,
            priority = %priority,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "delivery failed, retrying"
        );

        match route {
            RetryRoute::Scheduled => {
                let store = Arc::clone(&self.ctx.store);
                persist_until_ok(self.persist_interval, &id, "reschedule", || {
                    store.add_scheduled(message.clone(), due_at)
                })
                .await;
            }
            RetryRoute::Lane => {
                let store = Arc::clone(&self.ctx.store);
                let interval = self.persist_interval;
                let mut timers = self.timers.lock();
                while timers.try_join_next().is_some() {}
                timers.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let id = message.id().clone();
                    persist_until_ok(interval, &id, "requeue", || store.push(message.clone())).await;
                });
            }
        }

        self.ctx
            .metrics
            .increment(names::RETRIES_TOTAL, &[("priority", priority.as_str())]);
        self.ctx.metrics.observe(
            names::RETRY_DELAY_SECONDS,
            delay.as_secs_f64(),
            &[("priority", priority.as_str())],
        );
        self.ctx.events.emit(DomainEvent::RetryScheduled {
            id: id.clone(),
            retry_count,
            delay,
        });

        DispatchOutcome::Retrying {
            id,
            retry_count,
            delay,
            route,
        }
    }

    /// Push onto the dead-letter lane without touching the status again.
    async fn dead_letter_as_is(&self, message: Message, reason: DeadLetterReason) -> DispatchOutcome {
        let id = message.id().clone();
        let priority = message.priority();
        let retry_count = message.retry_count();

        let store = Arc::clone(&self.ctx.store);
        persist_until_ok(self.persist_interval, &id, "dead-letter", || {
            store.push_dead(message.clone())
        })
        .await;

        self.ctx.metrics.increment(
            names::DEAD_LETTERED_TOTAL,
            &[("priority", priority.as_str()), ("reason", reason.label())],
        );
        self.ctx.events.emit(DomainEvent::DeadLettered {
            id: id.clone(),
            retry_count,
            reason: reason.clone(),
        });
        tracing::warn!(message_id = %id, priority = %priority, retry_count, reason = %reason, "message dead-lettered");

        DispatchOutcome::DeadLettered {
            id,
            retry_count,
            reason,
        }
    }

    /// Wait for in-flight lane retry timers to push their messages back.
    pub async fn drain_timers(&self) {
        let mut timers = std::mem::take(&mut *self.timers.lock());
        while timers.join_next().await.is_some() {}
    }
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Retry a post-attempt store write until it lands.
///
/// Transient errors are retried every `interval`; any other error is logged
/// and the write abandoned.
async fn persist_until_ok<F, Fut>(interval: Duration, id: &MessageId, what: &str, mut op: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!(message_id = %id, failures, "{what} persisted after store recovery");
                }
                return;
            }
            Err(err) if err.is_transient() => {
                failures += 1;
                if failures == 1 {
                    tracing::warn!(message_id = %id, error = %err, "{what} failed, retrying until the store recovers");
                }
                tokio::time::sleep(interval).await;
            }
            Err(err) => {
                tracing::error!(message_id = %id, error = %err, "{what} rejected by store");
                return;
            }
        }
    }
}
