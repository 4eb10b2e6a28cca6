//! SchedulerSweep - scheduled index から priority lane への昇格
//!
//! # 不変条件
//! - due になった message を落とさない
//! - lane への push が失敗したら、元の due 時刻で scheduled index に戻す
//! - それも失敗した場合だけプロセス内の carry バッファに残し、次の tick で再試行
//! - 停止時は carry が空になるまで再試行する（打ち切りは engine の shutdown timeout）

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::context::AppContext;
use crate::domain::{DomainEvent, Message};
use crate::ports::StoreError;
use crate::ports::metrics_sink::names;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Messages pushed onto their lane during this tick.
    pub promoted: usize,
    /// Lane push failed; returned to the scheduled index for the next tick.
    pub deferred: usize,
    /// Neither lane nor index accepted them; held in memory.
    pub carried: usize,
}

pub struct SchedulerSweep {
    ctx: AppContext,
    interval: Duration,
    /// Popped from the index, still in `Scheduled` status, and not yet back
    /// in any store structure.
    carry: Mutex<Vec<Message>>,
}

impl SchedulerSweep {
    pub fn new(ctx: AppContext, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            carry: Mutex::new(Vec::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Messages currently held only in memory.
    pub fn carried(&self) -> usize {
        self.carry.lock().len()
    }

    /// One tick: pop every due entry, then push the carried-over messages
    /// followed by the newly due ones.
    ///
    /// A store error on the pop leaves the entries in the index and is
    /// returned. Push errors are handled per message and never returned.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let now = self.ctx.clock.now();
        let popped = self.ctx.store.pop_due_before(now).await;
        let result = match popped {
            Ok(due) => {
                self.carry.lock().extend(due);
                Ok(())
            }
            Err(err) => {
                self.ctx
                    .metrics
                    .increment(names::SWEEP_ERRORS_TOTAL, &[("stage", "pop_due")]);
                Err(err)
            }
        };

        self.drain_carry(&mut report).await;
        result?;

        if report.promoted > 0 || report.deferred > 0 || report.carried > 0 {
            tracing::debug!(
                promoted = report.promoted,
                deferred = report.deferred,
                carried = report.carried,
                "scheduler sweep"
            );
        }
        Ok(report)
    }

    /// Try to place every carried message. A message leaves the buffer only
    /// once the store holds it, so a cancelled sweep never loses one.
    async fn drain_carry(&self, report: &mut SweepReport) {
        let pending = self.carry.lock().clone();
        for message in pending {
            let id = message.id().clone();
            if self.place(message, report).await {
                let mut carry = self.carry.lock();
                if let Some(pos) = carry.iter().position(|m| m.id() == &id) {
                    carry.remove(pos);
                }
            }
        }
        report.carried = self.carried();
    }

    /// Push a message taken from the index onto its lane, or put it back
    /// under its original due time. `false` means the store took neither.
    async fn place(&self, scheduled: Message, report: &mut SweepReport) -> bool {
        let id = scheduled.id().clone();
        let priority = scheduled.priority();

        let mut pending = scheduled.clone();
        if let Err(err) = pending.promote() {
            tracing::error!(message_id = %id, error = %err, "unexpected status in scheduled index");
        }

        match self.ctx.store.push(pending).await {
            Ok(()) => {
                report.promoted += 1;
                self.ctx
                    .metrics
                    .increment(names::PROMOTED_TOTAL, &[("priority", priority.as_str())]);
                self.ctx
                    .events
                    .emit(DomainEvent::Promoted { id, priority });
                return true;
            }
            Err(StoreError::AlreadyQueued(_)) => {
                tracing::warn!(message_id = %id, "promoted message already queued, dropping duplicate");
                return true;
            }
            Err(err) => {
                tracing::warn!(message_id = %id, error = %err, "promotion failed, returning to scheduled index");
                self.ctx
                    .metrics
                    .increment(names::SWEEP_ERRORS_TOTAL, &[("stage", "push")]);
            }
        }

        let due_at = scheduled
            .scheduled_at()
            .unwrap_or_else(|| self.ctx.clock.now());
        match self.ctx.store.add_scheduled(scheduled, due_at).await {
            Ok(()) => {
                report.deferred += 1;
                true
            }
            Err(StoreError::AlreadyQueued(_)) => {
                tracing::warn!(message_id = %id, "deferred message already queued, dropping duplicate");
                true
            }
            Err(err) => {
                tracing::warn!(message_id = %id, error = %err, "store unavailable, holding due message in memory");
                self.ctx
                    .metrics
                    .increment(names::SWEEP_ERRORS_TOTAL, &[("stage", "reschedule")]);
                false
            }
        }
    }

    /// Tick every `interval` until `shutdown` flips to `true`, then hand any
    /// carried messages back to the store.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.sweep_once().await {
                tracing::warn!(error = %err, "scheduler sweep failed, retrying next tick");
            }
        }

        self.flush_carry().await;
    }

    /// Retry carried messages every `interval` until none is left.
    pub async fn flush_carry(&self) {
        loop {
            let mut report = SweepReport::default();
            self.drain_carry(&mut report).await;

            let carried = report.carried;
            if carried == 0 {
                if report.promoted > 0 || report.deferred > 0 {
                    tracing::info!(
                        promoted = report.promoted,
                        deferred = report.deferred,
                        "carried messages returned to the store"
                    );
                }
                return;
            }
            tracing::warn!(carried, "store still unavailable, holding due messages");
            tokio::time::sleep(self.interval).await;
        }
    }
}
