//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryQueueStore**: 単一プロセス用のキューストア
//! - **RecordingMetricsSink / RecordingEventSink**: メモリに記録するシンク
//!
//! 本番用のストア（Redis など）は別クレートに置く想定です。

pub mod memory_store;
pub mod recording;

pub use self::memory_store::InMemoryQueueStore;
pub use self::recording::{MetricKey, RecordingEventSink, RecordingMetricsSink};
