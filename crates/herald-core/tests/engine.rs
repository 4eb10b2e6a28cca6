mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use common::{ScriptedProvider, harness, message};
use herald_core::app::EngineBuilder;
use herald_core::circuit_breaker::CircuitState;
use herald_core::domain::{DeliveryReceipt, Message, MessageStatus, Payload, PriorityLane};
use herald_core::impls::{InMemoryQueueStore, RecordingEventSink};
use herald_core::ports::{DeliveryProvider, ProviderError, QueueStore};
use herald_core::HeraldConfig;

fn single_worker() -> HeraldConfig {
    let mut config = HeraldConfig::default();
    config.dispatch.workers = 1;
    config.dispatch.idle_interval_ms = 10;
    config.scheduler.interval_ms = 10;
    config
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn single_worker_dispatches_in_priority_order() {
    let h = harness(single_worker(), ScriptedProvider::succeeding());
    let producer = h.engine.producer();
    producer.enqueue(message("low-1"), PriorityLane::Low).await.unwrap();
    producer.enqueue(message("normal-1"), PriorityLane::Normal).await.unwrap();
    producer.enqueue(message("high-1"), PriorityLane::High).await.unwrap();

    let running = h.engine.start();
    wait_for(|| h.provider.sent().len() == 3).await;
    assert!(running.shutdown().await.clean);

    assert_eq!(h.provider.sent(), vec!["high-1", "normal-1", "low-1"]);
    assert_eq!(h.events.sent_order(), vec!["high-1", "normal-1", "low-1"]);
}

#[tokio::test]
async fn running_engine_promotes_scheduled_messages() {
    let h = harness(single_worker(), ScriptedProvider::succeeding());
    let due_at = Utc::now() + chrono::Duration::minutes(5);
    h.engine
        .producer()
        .schedule(message("reminder"), due_at)
        .await
        .unwrap();

    let running = h.engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.provider.sent().is_empty());

    h.clock.set(due_at);
    wait_for(|| h.provider.sent() == vec!["reminder".to_string()]).await;
    assert!(running.shutdown().await.clean);
}

/// Takes a while per message so shutdown lands mid-send.
struct SlowProvider {
    delay: Duration,
    sent: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryProvider for SlowProvider {
    async fn send(&self, message: &Message) -> Result<DeliveryReceipt, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.sent.lock().push(message.id().to_string());
        Ok(DeliveryReceipt::default())
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_finishes_in_flight_sends() {
    let store = InMemoryQueueStore::new();
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_millis(500),
        sent: parking_lot::Mutex::new(Vec::new()),
    });
    let engine = EngineBuilder::new(single_worker())
        .store(Arc::new(store.clone()))
        .provider(provider.clone())
        .build()
        .unwrap();

    for id in ["a", "b", "c"] {
        engine
            .producer()
            .enqueue(message(id), PriorityLane::Normal)
            .await
            .unwrap();
    }

    let running = engine.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = running.shutdown().await;

    assert!(report.clean);
    // "a" was in flight and completed; the rest stay queued
    assert_eq!(*provider.sent.lock(), vec!["a".to_string()]);
    assert_eq!(store.depths().await.unwrap().normal, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_gives_up_after_timeout() {
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_secs(3),
        sent: parking_lot::Mutex::new(Vec::new()),
    });
    let mut config = single_worker();
    config.dispatch.send_timeout_ms = 10_000;
    config.dispatch.shutdown_timeout_ms = 1_000;
    let engine = EngineBuilder::new(config)
        .provider(provider.clone())
        .build()
        .unwrap();
    engine
        .producer()
        .enqueue(message("slow"), PriorityLane::High)
        .await
        .unwrap();

    let running = engine.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = running.shutdown().await;

    assert!(!report.clean);
    assert!(provider.sent.lock().is_empty());
}

/// Takes the store down while a send is in flight, and brings it back later.
struct OutageProvider {
    store: InMemoryQueueStore,
    outage: Duration,
}

#[async_trait]
impl DeliveryProvider for OutageProvider {
    async fn send(&self, _message: &Message) -> Result<DeliveryReceipt, ProviderError> {
        self.store.set_available(false);
        let store = self.store.clone();
        let outage = self.outage;
        tokio::spawn(async move {
            tokio::time::sleep(outage).await;
            store.set_available(true);
        });
        Err(ProviderError::rejected(true, "gateway busy"))
    }
}

#[tokio::test(start_paused = true)]
async fn retry_survives_store_outage() {
    let store = InMemoryQueueStore::new();
    let events = RecordingEventSink::new();
    let engine = EngineBuilder::new(single_worker())
        .store(Arc::new(store.clone()))
        .events(Arc::new(events.clone()))
        .provider(Arc::new(OutageProvider {
            store: store.clone(),
            outage: Duration::from_millis(250),
        }))
        .build()
        .unwrap();

    let mut msg = Message::new("m-1", "org-1", Payload::text("hi"), Utc::now());
    msg.admit(PriorityLane::High, 3);
    store.push(msg).await.unwrap();
    let popped = store.pop_front(PriorityLane::High).await.unwrap().unwrap();

    engine.dispatcher().process(0, popped).await;

    let scheduled = store.scheduled_snapshot().await;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].status(), MessageStatus::Scheduled);
    assert_eq!(scheduled[0].retry_count(), 1);
    assert_eq!(events.count("retry_scheduled"), 1);
}

#[tokio::test]
async fn breaker_opens_under_sustained_failure() {
    let mut config = HeraldConfig::default();
    config.breaker.failure_threshold = 2;
    let h = harness(
        config,
        ScriptedProvider::always(ProviderError::Transport("connection refused".into())),
    );
    for id in ["a", "b", "c"] {
        h.engine
            .producer()
            .enqueue(message(id), PriorityLane::Normal)
            .await
            .unwrap();
    }

    let mut cursor = herald_core::app::LaneCursor::default();
    for _ in 0..3 {
        h.engine
            .dispatcher()
            .dispatch_next(0, &mut cursor)
            .await
            .unwrap();
    }

    assert_eq!(h.engine.breaker_state(), CircuitState::Open);
    // the third message never reached the provider
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.engine.depths().await.unwrap().scheduled, 3);
}
