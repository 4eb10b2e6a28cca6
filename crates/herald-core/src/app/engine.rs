//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、プロバイダ未設定なら BuildError を返す
//! - それ以外の依存（ストア・時計・シンク）は開発用のデフォルトで埋める

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use super::context::AppContext;
use super::dispatcher::Dispatcher;
use super::producer::Producer;
use super::sweep::SchedulerSweep;
use super::worker_pool::WorkerPool;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSettings, CircuitState};
use crate::config::{ConfigError, HeraldConfig};
use crate::domain::{BackoffDecider, Decider, Message};
use crate::impls::InMemoryQueueStore;
use crate::policy::RetryPolicy;
use crate::ports::{
    Clock, DeliveryProvider, EventSink, MetricsSink, NoopEventSink, NoopMetricsSink, QueueDepths,
    QueueStore, StoreError, SystemClock,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no delivery provider configured")]
    MissingProvider,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .provider(Arc::new(MyProvider))
///     .build()?;
/// let running = engine.start();
/// engine.producer().enqueue(message, PriorityLane::High).await?;
/// running.shutdown().await;
/// ```
pub struct EngineBuilder {
    config: HeraldConfig,
    store: Option<Arc<dyn QueueStore>>,
    provider: Option<Arc<dyn DeliveryProvider>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    events: Option<Arc<dyn EventSink>>,
    decider: Option<Arc<dyn Decider>>,
}

impl EngineBuilder {
    pub fn new(config: HeraldConfig) -> Self {
        Self {
            config,
            store: None,
            provider: None,
            clock: None,
            metrics: None,
            events: None,
            decider: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn DeliveryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the default exponential-backoff decider.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        let provider = self.provider.ok_or(BuildError::MissingProvider)?;

        let ctx = AppContext {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryQueueStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)),
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
        };

        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(BackoffDecider::new(RetryPolicy::from(&self.config.retry)))
        });
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerSettings::from(
            &self.config.breaker,
        )));

        let dispatch = &self.config.dispatch;
        let dispatcher = Arc::new(Dispatcher::new(
            ctx.clone(),
            provider,
            breaker,
            decider,
            dispatch.send_timeout(),
            dispatch.idle_interval(),
        ));
        let sweep = Arc::new(SchedulerSweep::new(
            ctx.clone(),
            self.config.scheduler.interval(),
        ));
        let producer = Producer::new(ctx.clone(), self.config.producer.clone());

        Ok(Engine {
            config: self.config,
            ctx,
            producer,
            sweep,
            dispatcher,
        })
    }
}

/// A wired engine. Admission works right away; dispatch starts with
/// [`Engine::start`].
pub struct Engine {
    config: HeraldConfig,
    ctx: AppContext,
    producer: Producer,
    sweep: Arc<SchedulerSweep>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    pub fn builder(config: HeraldConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &HeraldConfig {
        &self.config
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn sweep(&self) -> &SchedulerSweep {
        &self.sweep
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn depths(&self) -> Result<QueueDepths, StoreError> {
        self.ctx.store.depths().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<Message>, StoreError> {
        self.ctx.store.dead_letters().await
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.dispatcher.breaker_state()
    }

    /// Spawn the worker pool and the scheduler sweep.
    pub fn start(&self) -> RunningEngine {
        let dispatch = &self.config.dispatch;
        let pool = WorkerPool::spawn(
            dispatch.workers,
            Arc::clone(&self.dispatcher),
            dispatch.lane_selection,
            dispatch.idle_interval(),
        );

        let sweep = Arc::clone(&self.sweep);
        let signal = pool.shutdown_signal();
        let sweep_join = tokio::spawn(async move { sweep.run(signal).await });

        RunningEngine {
            pool,
            sweep: sweep_join,
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown_timeout: dispatch.shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker, the sweep and pending retry timers finished in time.
    pub clean: bool,
}

pub struct RunningEngine {
    pool: WorkerPool,
    sweep: JoinHandle<()>,
    dispatcher: Arc<Dispatcher>,
    shutdown_timeout: Duration,
}

impl RunningEngine {
    /// Stop claiming new messages, let in-flight sends finish, and wait up to
    /// the configured shutdown timeout. Whatever is still running after that
    /// is aborted.
    pub async fn shutdown(self) -> ShutdownReport {
        let RunningEngine {
            pool,
            sweep,
            dispatcher,
            shutdown_timeout,
        } = self;

        let mut aborts: Vec<AbortHandle> = pool.abort_handles();
        aborts.push(sweep.abort_handle());

        let drain = async move {
            pool.shutdown_and_join().await;
            if let Err(err) = sweep.await {
                tracing::error!(error = %err, "scheduler sweep panicked");
            }
            dispatcher.drain_timers().await;
        };

        match tokio::time::timeout(shutdown_timeout, drain).await {
            Ok(()) => {
                tracing::info!("engine stopped");
                ShutdownReport { clean: true }
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = shutdown_timeout.as_millis() as u64,
                    "shutdown timed out, aborting remaining tasks"
                );
                for handle in aborts {
                    handle.abort();
                }
                ShutdownReport { clean: false }
            }
        }
    }
}
