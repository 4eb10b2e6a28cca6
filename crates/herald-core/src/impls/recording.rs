//! Recording sinks - メトリクスとイベントをメモリに記録する
//!
//! テストとデモ用バイナリで使います。

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::DomainEvent;
use crate::ports::metrics_sink::Labels;
use crate::ports::{EventSink, MetricsSink};

/// Metric key: name plus sorted `key=value` labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
}

impl MetricKey {
    fn new(name: &'static str, labels: Labels<'_>) -> Self {
        let mut labels: Vec<(&'static str, String)> = labels
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();
        labels.sort();
        Self { name, labels }
    }
}

#[derive(Debug, Default)]
struct MetricsData {
    counters: BTreeMap<MetricKey, u64>,
    observations: BTreeMap<MetricKey, Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingMetricsSink {
    data: Arc<Mutex<MetricsData>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value for an exact label set.
    pub fn counter(&self, name: &'static str, labels: Labels<'_>) -> u64 {
        let key = MetricKey::new(name, labels);
        self.data.lock().counters.get(&key).copied().unwrap_or(0)
    }

    /// Counter value summed over every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.data
            .lock()
            .counters
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, value)| value)
            .sum()
    }

    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.data
            .lock()
            .observations
            .iter()
            .filter(|(key, _)| key.name == name)
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }

    pub fn counters(&self) -> Vec<(MetricKey, u64)> {
        self.data
            .lock()
            .counters
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn increment(&self, name: &'static str, labels: Labels<'_>) {
        let key = MetricKey::new(name, labels);
        *self.data.lock().counters.entry(key).or_insert(0) += 1;
    }

    fn observe(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        let key = MetricKey::new(name, labels);
        self.data
            .lock()
            .observations
            .entry(key)
            .or_default()
            .push(value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Ids of `Sent` events, in emission order.
    pub fn sent_order(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DomainEvent::Sent { id, .. } => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Ids of `Claimed` events, in emission order.
    pub fn claim_order(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DomainEvent::Claimed { id, .. } => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}
