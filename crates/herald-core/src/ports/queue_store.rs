//! QueueStore port - 優先度レーン・スケジュール索引・デッドレターの保管
//!
//! ストアはキュー所属（membership）の唯一の変更者です。
//! 1 つの message id は常に高々 1 つの構造（レーン / スケジュール索引 /
//! デッドレター）にしか存在しません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Message, MessageId, PriorityLane};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// ストアに到達できない（一時的）
    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    /// 既にどこかのレーン / 索引に存在する
    #[error("message {0} is already queued")]
    AlreadyQueued(MessageId),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Per-structure message counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub scheduled: usize,
    pub dead: usize,
}

impl QueueDepths {
    pub fn lane(&self, lane: PriorityLane) -> usize {
        match lane {
            PriorityLane::High => self.high,
            PriorityLane::Normal => self.normal,
            PriorityLane::Low => self.low,
        }
    }

    /// Messages a worker could claim right now.
    pub fn dispatchable(&self) -> usize {
        self.high + self.normal + self.low
    }

    /// Everything not yet terminal-and-sent: lanes, scheduled index and dead letters.
    pub fn total(&self) -> usize {
        self.dispatchable() + self.scheduled + self.dead
    }
}

/// QueueStore はレーンごとの順序付きリストと時刻順の索引を提供
///
/// # 契約
/// - `push`: 対象レーン（`message.priority()`）の末尾に追加
/// - `pop_front`: 先頭を原子的に取り出す（2 つの呼び出し元が同じ message を受け取らない）
/// - `add_scheduled` / `pop_due_before`: `due_at <= now` のものを全て取り出す
/// - `push_dead`: デッドレターに追加
/// - 障害時は `StoreError::Unavailable` を返し、message を黙って落とさない
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push(&self, message: Message) -> Result<(), StoreError>;

    async fn pop_front(&self, lane: PriorityLane) -> Result<Option<Message>, StoreError>;

    async fn add_scheduled(&self, message: Message, due_at: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// Remove and return every scheduled entry with `due_at <= now`, earliest first.
    async fn pop_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Message>, StoreError>;

    async fn push_dead(&self, message: Message) -> Result<(), StoreError>;

    async fn depths(&self) -> Result<QueueDepths, StoreError>;

    async fn dead_letters(&self) -> Result<Vec<Message>, StoreError>;
}
