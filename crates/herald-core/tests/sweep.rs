mod common;

use std::time::Duration;

use chrono::{DateTime, Utc};

use common::{Harness, ScriptedProvider, flaky_harness, message};
use herald_core::HeraldConfig;
use herald_core::app::SweepReport;
use herald_core::domain::{MessageId, MessageStatus, PriorityLane};
use herald_core::ports::Clock;

/// Schedule `id` one second out and move the clock past it.
async fn schedule_due(h: &Harness, id: &str) -> DateTime<Utc> {
    let due_at = h.clock.now() + chrono::Duration::seconds(1);
    h.engine
        .producer()
        .schedule(message(id).with_priority(PriorityLane::Normal), due_at)
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(2));
    due_at
}

fn report(promoted: usize, deferred: usize, carried: usize) -> SweepReport {
    SweepReport {
        promoted,
        deferred,
        carried,
    }
}

#[tokio::test]
async fn failed_promotion_returns_message_to_scheduled_index() {
    let (h, flaky) = flaky_harness(HeraldConfig::default(), ScriptedProvider::succeeding());
    let due_at = schedule_due(&h, "reminder").await;
    flaky.fail_push(true);

    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 1, 0));
    assert!(h.store.contains(&MessageId::new("reminder")).await);
    let scheduled = h.store.scheduled_snapshot().await;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].status(), MessageStatus::Scheduled);
    assert_eq!(scheduled[0].scheduled_at(), Some(due_at));

    // stays in the index for as long as pushes fail
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 1, 0));
    assert_eq!(h.engine.depths().await.unwrap().scheduled, 1);

    flaky.fail_push(false);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(1, 0, 0));
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 0));

    let depths = h.engine.depths().await.unwrap();
    assert_eq!(depths.normal, 1);
    assert_eq!(depths.scheduled, 0);
    assert_eq!(
        h.store.lane_snapshot(PriorityLane::Normal).await[0].status(),
        MessageStatus::Pending
    );
    assert_eq!(h.events.count("promoted"), 1);
}

#[tokio::test]
async fn carry_buffer_holds_message_while_index_is_down() {
    let (h, flaky) = flaky_harness(HeraldConfig::default(), ScriptedProvider::succeeding());
    schedule_due(&h, "reminder").await;
    flaky.fail_push(true);
    flaky.fail_add_scheduled(true);

    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 1));
    assert_eq!(h.engine.depths().await.unwrap().total(), 0);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 1));

    // index back first: the carried message becomes durable again
    flaky.fail_add_scheduled(false);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 1, 0));
    assert_eq!(h.engine.sweep().carried(), 0);
    assert_eq!(h.engine.depths().await.unwrap().scheduled, 1);

    flaky.fail_push(false);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(1, 0, 0));
    assert_eq!(h.engine.depths().await.unwrap().normal, 1);
    assert_eq!(h.events.count("promoted"), 1);
}

#[tokio::test]
async fn already_queued_promotion_is_discarded() {
    let (h, flaky) = flaky_harness(HeraldConfig::default(), ScriptedProvider::succeeding());
    schedule_due(&h, "dup").await;
    flaky.fail_push(true);
    flaky.fail_add_scheduled(true);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 1));

    // the same id is admitted again while the first copy sits in memory
    flaky.fail_push(false);
    flaky.fail_add_scheduled(false);
    h.engine
        .producer()
        .enqueue(message("dup"), PriorityLane::High)
        .await
        .unwrap();

    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 0));
    assert_eq!(h.engine.sweep().carried(), 0);

    let depths = h.engine.depths().await.unwrap();
    assert_eq!(depths.high, 1);
    assert_eq!(depths.normal + depths.scheduled, 0);
    assert_eq!(h.events.count("promoted"), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_retrying_carried_messages() {
    let (h, flaky) = flaky_harness(HeraldConfig::default(), ScriptedProvider::succeeding());
    schedule_due(&h, "reminder").await;
    flaky.fail_push(true);
    flaky.fail_add_scheduled(true);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 1));

    let running = h.engine.start();
    tokio::spawn({
        let flaky = flaky.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            flaky.fail_push(false);
            flaky.fail_add_scheduled(false);
        }
    });

    assert!(running.shutdown().await.clean);
    assert_eq!(h.engine.sweep().carried(), 0);
    // workers were already stopped, so it waits on its lane
    assert_eq!(h.engine.depths().await.unwrap().normal, 1);
    assert!(h.provider.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_timeout_bounds_the_carry_flush() {
    let mut config = HeraldConfig::default();
    config.dispatch.shutdown_timeout_ms = 2_000;
    let (h, flaky) = flaky_harness(config, ScriptedProvider::succeeding());
    schedule_due(&h, "reminder").await;
    flaky.fail_push(true);
    flaky.fail_add_scheduled(true);
    assert_eq!(h.engine.sweep().sweep_once().await.unwrap(), report(0, 0, 1));

    let running = h.engine.start();
    assert!(!running.shutdown().await.clean);
    assert_eq!(h.engine.sweep().carried(), 1);
}
