#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use herald_core::app::{Engine, EngineBuilder};
use herald_core::domain::{DeliveryReceipt, Message, Payload, PriorityLane};
use herald_core::impls::{InMemoryQueueStore, RecordingEventSink, RecordingMetricsSink};
use herald_core::ports::{
    DeliveryProvider, ManualClock, ProviderError, QueueDepths, QueueStore, StoreError,
};
use herald_core::HeraldConfig;

/// Provider that answers from a script and succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<(), ProviderError>>>,
    fallback: Option<ProviderError>,
    calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Result<(), ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Fails every call with `err`.
    pub fn always(err: ProviderError) -> Self {
        Self {
            fallback: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids accepted by the provider, in call order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DeliveryProvider for ScriptedProvider {
    async fn send(&self, message: &Message) -> Result<DeliveryReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        let result = match (next, &self.fallback) {
            (Some(scripted), _) => scripted,
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Ok(()),
        };
        result.map(|()| {
            self.sent.lock().push(message.id().to_string());
            DeliveryReceipt::with_provider_id(format!("prov-{}", message.id()))
        })
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: InMemoryQueueStore,
    pub clock: ManualClock,
    pub events: RecordingEventSink,
    pub metrics: RecordingMetricsSink,
    pub provider: Arc<ScriptedProvider>,
}

/// In-memory store whose lane pushes and scheduled inserts can be failed
/// independently; every other call goes straight through.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryQueueStore,
    push_down: Arc<AtomicBool>,
    add_scheduled_down: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_push(&self, down: bool) {
        self.push_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_add_scheduled(&self, down: bool) {
        self.add_scheduled_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn push(&self, message: Message) -> Result<(), StoreError> {
        if self.push_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lane push refused".into()));
        }
        self.inner.push(message).await
    }

    async fn pop_front(&self, lane: PriorityLane) -> Result<Option<Message>, StoreError> {
        self.inner.pop_front(lane).await
    }

    async fn add_scheduled(&self, message: Message, due_at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.add_scheduled_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scheduled insert refused".into()));
        }
        self.inner.add_scheduled(message, due_at).await
    }

    async fn pop_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Message>, StoreError> {
        self.inner.pop_due_before(now).await
    }

    async fn push_dead(&self, message: Message) -> Result<(), StoreError> {
        self.inner.push_dead(message).await
    }

    async fn depths(&self) -> Result<QueueDepths, StoreError> {
        self.inner.depths().await
    }

    async fn dead_letters(&self) -> Result<Vec<Message>, StoreError> {
        self.inner.dead_letters().await
    }
}

pub fn harness(config: HeraldConfig, provider: ScriptedProvider) -> Harness {
    let store = InMemoryQueueStore::new();
    build_harness(config, provider, Arc::new(store.clone()), store)
}

/// Harness over a [`FlakyStore`]; `Harness::store` is the wrapped store.
pub fn flaky_harness(config: HeraldConfig, provider: ScriptedProvider) -> (Harness, FlakyStore) {
    let flaky = FlakyStore::default();
    let h = build_harness(config, provider, Arc::new(flaky.clone()), flaky.inner.clone());
    (h, flaky)
}

fn build_harness(
    config: HeraldConfig,
    provider: ScriptedProvider,
    backend: Arc<dyn QueueStore>,
    store: InMemoryQueueStore,
) -> Harness {
    let clock = ManualClock::default();
    let events = RecordingEventSink::new();
    let metrics = RecordingMetricsSink::new();
    let provider = Arc::new(provider);

    let engine = EngineBuilder::new(config)
        .store(backend)
        .clock(Arc::new(clock.clone()))
        .events(Arc::new(events.clone()))
        .metrics(Arc::new(metrics.clone()))
        .provider(provider.clone())
        .build()
        .expect("valid test config");

    Harness {
        engine,
        store,
        clock,
        events,
        metrics,
        provider,
    }
}

pub fn message(id: &str) -> Message {
    Message::new(id, "org-test", Payload::text(format!("body of {id}")), Utc::now())
}
