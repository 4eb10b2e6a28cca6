use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::time::{Duration, Instant, sleep};

use herald_core::app::EngineBuilder;
use herald_core::domain::{DeliveryReceipt, Message, Payload, PriorityLane};
use herald_core::impls::{RecordingEventSink, RecordingMetricsSink};
use herald_core::ports::metrics_sink::names;
use herald_core::ports::{DeliveryProvider, ProviderError};
use herald_core::{HeraldConfig, telemetry};

#[derive(Parser)]
#[command(name = "herald", about = "Run a simulated workload through the delivery queue")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Messages to enqueue, spread across the three lanes
    #[arg(long, default_value_t = 30)]
    messages: usize,

    /// Of those, how many go through the scheduled index first
    #[arg(long, default_value_t = 3)]
    scheduled: usize,

    /// Override `dispatch.workers`
    #[arg(long)]
    workers: Option<usize>,

    /// Override `retry.base_delay_ms`
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Override `scheduler.interval_ms`
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Probability that a send fails recoverably
    #[arg(long, default_value_t = 0.2)]
    transient_rate: f64,

    /// Probability that a send is rejected permanently
    #[arg(long, default_value_t = 0.05)]
    permanent_rate: f64,

    /// Simulated provider latency
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Give up waiting for the workload after this long
    #[arg(long, default_value_t = 60)]
    max_wait_secs: u64,
}

/// 外部プロバイダの代わり：確率的に失敗する
struct SimulatedProvider {
    transient_rate: f64,
    permanent_rate: f64,
    latency: Duration,
}

#[async_trait]
impl DeliveryProvider for SimulatedProvider {
    async fn send(&self, message: &Message) -> Result<DeliveryReceipt, ProviderError> {
        sleep(self.latency).await;

        let roll: f64 = rand::random();
        if roll < self.permanent_rate {
            return Err(ProviderError::rejected(false, "recipient not reachable"));
        }
        if roll < self.permanent_rate + self.transient_rate {
            return Err(ProviderError::rejected(true, "rate limited"));
        }
        Ok(DeliveryReceipt::with_provider_id(format!(
            "sim-{}",
            message.id()
        )))
    }
}

/// Flags win over the file only when they are given.
fn apply_overrides(cli: &Cli, config: &mut HeraldConfig) {
    if let Some(workers) = cli.workers {
        config.dispatch.workers = workers;
    }
    if let Some(base_delay_ms) = cli.base_delay_ms {
        config.retry.base_delay_ms = base_delay_ms;
        config.retry.max_delay_ms = config.retry.max_delay_ms.max(base_delay_ms);
    }
    if let Some(interval_ms) = cli.sweep_interval_ms {
        config.scheduler.interval_ms = interval_ms;
    }
}

fn lane_for(i: usize) -> PriorityLane {
    PriorityLane::DISPATCH_ORDER[i % PriorityLane::DISPATCH_ORDER.len()]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HeraldConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HeraldConfig::default(),
    };
    apply_overrides(&cli, &mut config);

    let metrics = RecordingMetricsSink::new();
    let events = RecordingEventSink::new();
    let engine = EngineBuilder::new(config)
        .provider(Arc::new(SimulatedProvider {
            transient_rate: cli.transient_rate,
            permanent_rate: cli.permanent_rate,
            latency: Duration::from_millis(cli.latency_ms),
        }))
        .metrics(Arc::new(metrics.clone()))
        .events(Arc::new(events.clone()))
        .build()
        .context("building engine")?;

    let running = engine.start();
    let producer = engine.producer();

    let scheduled = cli.scheduled.min(cli.messages);
    let mut batches: [Vec<Message>; 3] = Default::default();
    for i in 0..cli.messages - scheduled {
        let message = producer.compose("org-demo", Payload::text(format!("demo message {i}")));
        batches[lane_for(i).index()].push(message);
    }
    for (lane, batch) in PriorityLane::DISPATCH_ORDER.into_iter().zip(batches) {
        if batch.is_empty() {
            continue;
        }
        let report = producer.enqueue_batch(batch, lane).await?;
        tracing::info!(priority = %lane, admitted = report.admitted.len(), "batch admitted");
    }
    for i in 0..scheduled {
        let message = producer
            .compose("org-demo", Payload::text(format!("scheduled message {i}")))
            .with_priority(lane_for(i));
        let due_at = chrono::Utc::now() + chrono::Duration::milliseconds(500 * (i as i64 + 1));
        producer.schedule(message, due_at).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(cli.max_wait_secs);
    loop {
        let settled = metrics.counter_total(names::SENT_TOTAL)
            + metrics.counter_total(names::DEAD_LETTERED_TOTAL);
        if settled as usize >= cli.messages {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(settled, expected = cli.messages, "workload did not settle in time");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(100)) => {}
        }
    }

    let report = running.shutdown().await;
    let depths = engine.depths().await?;

    let summary = serde_json::json!({
        "clean_shutdown": report.clean,
        "breaker": engine.breaker_state().as_str(),
        "depths": depths,
        "attempts": metrics.counter_total(names::ATTEMPTS_TOTAL),
        "sent": metrics.counter_total(names::SENT_TOTAL),
        "retries": metrics.counter_total(names::RETRIES_TOTAL),
        "dead_lettered": metrics.counter_total(names::DEAD_LETTERED_TOTAL),
        "events": events.events().len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
