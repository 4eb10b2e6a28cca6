//! InMemoryQueueStore - 単一プロセス用のキューストア
//!
//! 全ての構造を 1 つの tokio Mutex で守るので、pop は原子的です。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Message, MessageId, PriorityLane};
use crate::ports::{QueueDepths, QueueStore, StoreError};

/// Scheduled entry for the time-ordered index.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first); `seq`
/// keeps insertion order among equal due times.
#[derive(Debug)]
struct ScheduledEntry {
    due_at: DateTime<Utc>,
    seq: u64,
    message: Message,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct StoreState {
    lanes: [VecDeque<Message>; 3],
    scheduled: BinaryHeap<ScheduledEntry>,
    dead: Vec<Message>,
    /// Ids held by any lane, the scheduled index or the dead-letter lane.
    membership: HashSet<MessageId>,
    next_seq: u64,
}

impl StoreState {
    fn claim_membership(&mut self, id: &MessageId) -> Result<(), StoreError> {
        if !self.membership.insert(id.clone()) {
            return Err(StoreError::AlreadyQueued(id.clone()));
        }
        Ok(())
    }

    fn release_membership(&mut self, id: &MessageId) {
        self.membership.remove(id);
    }
}

/// Single-process `QueueStore`.
///
/// One mutex guards every structure, so each call is atomic with respect to
/// any message id and two callers never pop the same message.
/// `set_available(false)` makes every call fail with `StoreError::Unavailable`.
#[derive(Clone)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<StoreState>>,
    available: Arc<AtomicBool>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Snapshot of one lane, head first.
    pub async fn lane_snapshot(&self, lane: PriorityLane) -> Vec<Message> {
        let state = self.state.lock().await;
        state.lanes[lane.index()].iter().cloned().collect()
    }

    /// Snapshot of the scheduled index, earliest first.
    pub async fn scheduled_snapshot(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        let mut entries: Vec<&ScheduledEntry> = state.scheduled.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.message.clone()).collect()
    }

    /// Is this id in any lane, the scheduled index or the dead-letter lane?
    pub async fn contains(&self, id: &MessageId) -> bool {
        self.state.lock().await.membership.contains(id)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        }
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn push(&self, message: Message) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let lane = message.priority();
        state.claim_membership(message.id())?;
        state.lanes[lane.index()].push_back(message);
        Ok(())
    }

    async fn pop_front(&self, lane: PriorityLane) -> Result<Option<Message>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let popped = state.lanes[lane.index()].pop_front();
        if let Some(message) = &popped {
            state.release_membership(message.id());
        }
        Ok(popped)
    }

    async fn add_scheduled(
        &self,
        message: Message,
        due_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.claim_membership(message.id())?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.scheduled.push(ScheduledEntry {
            due_at,
            seq,
            message,
        });
        Ok(())
    }

    async fn pop_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut due = Vec::new();
        while let Some(entry) = state.scheduled.peek() {
            if entry.due_at > now {
                break; // heap is sorted
            }
            if let Some(entry) = state.scheduled.pop() {
                state.release_membership(entry.message.id());
                due.push(entry.message);
            }
        }
        Ok(due)
    }

    async fn push_dead(&self, message: Message) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.claim_membership(message.id())?;
        state.dead.push(message);
        Ok(())
    }

    async fn depths(&self) -> Result<QueueDepths, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(QueueDepths {
            high: state.lanes[PriorityLane::High.index()].len(),
            normal: state.lanes[PriorityLane::Normal.index()].len(),
            low: state.lanes[PriorityLane::Low.index()].len(),
            scheduled: state.scheduled.len(),
            dead: state.dead.len(),
        })
    }

    async fn dead_letters(&self) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.dead.clone())
    }
}
