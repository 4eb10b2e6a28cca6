//! herald-core
//!
//! Prioritized message delivery queue: admission, scheduling, dispatch with
//! retry/backoff and dead-lettering.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, status, outcome, decision, events, errors）
//! - **policy**: リトライ間隔の計算（RetryPolicy）
//! - **ports**: 抽象化レイヤー（QueueStore, DeliveryProvider, MetricsSink, EventSink, Clock）
//! - **impls**: 実装（InMemoryQueueStore, Recording sinks）
//! - **app**: アプリケーション層（Producer, SchedulerSweep, Dispatcher, WorkerPool, Engine）
//! - **circuit_breaker**: プロバイダ保護用のサーキットブレーカ
//! - **config** / **telemetry**: 設定とログ初期化

pub mod app;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod impls;
pub mod policy;
pub mod ports;
pub mod telemetry;

pub use app::{Engine, EngineBuilder, Producer};
pub use config::HeraldConfig;
pub use domain::{HeraldError, Message, MessageId, MessageStatus, Payload, PriorityLane};
