//! Ports - 外部との境界
//!
//! エンジンが依存する外部システム（キューストア、配送プロバイダ、メトリクス、
//! イベント、時計）を trait として定義します。実装は `impls` にあります。

pub mod clock;
pub mod event_sink;
pub mod metrics_sink;
pub mod provider;
pub mod queue_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::metrics_sink::{MetricsSink, NoopMetricsSink};
pub use self::provider::{DeliveryProvider, ProviderError};
pub use self::queue_store::{QueueDepths, QueueStore, StoreError};
