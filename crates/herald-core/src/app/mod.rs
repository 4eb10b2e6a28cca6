//! App - アプリケーション層
//!
//! ports を組み合わせて受付・スケジュール・配送を実装します。
//!
//! # 主要コンポーネント
//! - **Producer**: enqueue / enqueue_batch / schedule
//! - **SchedulerSweep**: 期限の来た scheduled message をレーンへ昇格
//! - **Dispatcher**: 1 件の配送試行（claim→send→decide→persist）
//! - **WorkerPool**: W 本の配送ループ
//! - **EngineBuilder / Engine**: ワイヤリングと起動・停止

pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod lanes;
pub mod producer;
pub mod sweep;
pub mod worker_pool;

pub use self::context::AppContext;
pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::engine::{BuildError, Engine, EngineBuilder, RunningEngine, ShutdownReport};
pub use self::lanes::LaneCursor;
pub use self::producer::{BatchRejection, BatchReport, Producer};
pub use self::sweep::{SchedulerSweep, SweepReport};
pub use self::worker_pool::WorkerPool;
