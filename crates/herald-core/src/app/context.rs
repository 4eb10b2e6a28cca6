//! AppContext - 各コンポーネントに渡す共有ハンドル

use std::sync::Arc;

use crate::impls::InMemoryQueueStore;
use crate::ports::{Clock, EventSink, MetricsSink, NoopEventSink, NoopMetricsSink, QueueStore, SystemClock};

/// Store, clock and sinks, cheaply cloneable.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn QueueStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn MetricsSink>,
    pub events: Arc<dyn EventSink>,
}

impl AppContext {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetricsSink),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryQueueStore::new()))
    }
}
