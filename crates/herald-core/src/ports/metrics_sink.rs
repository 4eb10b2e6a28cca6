//! MetricsSink port - カウンタ / ヒストグラムの送出
//!
//! グローバルなカウンタは持たず、エンジンに注入します。
//! 送出の失敗は message 処理に影響させてはいけないので、戻り値はありません。

/// Metric names emitted by the engine.
pub mod names {
    pub const ENQUEUED_TOTAL: &str = "herald.producer.enqueued.total";
    pub const SCHEDULED_TOTAL: &str = "herald.producer.scheduled.total";
    pub const PROMOTED_TOTAL: &str = "herald.scheduler.promoted.total";
    pub const SWEEP_ERRORS_TOTAL: &str = "herald.scheduler.errors.total";
    pub const ATTEMPTS_TOTAL: &str = "herald.delivery.attempts.total";
    pub const SENT_TOTAL: &str = "herald.delivery.sent.total";
    pub const FAILURES_TOTAL: &str = "herald.delivery.failures.total";
    pub const RETRIES_TOTAL: &str = "herald.delivery.retries.total";
    pub const DEAD_LETTERED_TOTAL: &str = "herald.delivery.dead_lettered.total";
    pub const SEND_DURATION_SECONDS: &str = "herald.delivery.duration.seconds";
    pub const RETRY_DELAY_SECONDS: &str = "herald.delivery.retry_delay.seconds";
}

/// Label pairs attached to a metric sample.
pub type Labels<'a> = &'a [(&'static str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, labels: Labels<'_>);

    fn observe(&self, name: &'static str, value: f64, labels: Labels<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn observe(&self, _name: &'static str, _value: f64, _labels: Labels<'_>) {}
}
