use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::lanes::LaneCursor;
use crate::config::LaneSelection;

/// Dispatch worker pool handle.
/// - `request_shutdown()` でワーカーは新しい message を取らなくなる
/// - 送信中の message は最後まで処理する（途中キャンセルはしない）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` independent dispatch loops.
    pub fn spawn(
        n: usize,
        dispatcher: Arc<Dispatcher>,
        selection: LaneSelection,
        idle_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker in 0..n {
            let dispatcher = Arc::clone(&dispatcher);
            let mut rx = shutdown_rx.clone();
            let cursor = LaneCursor::new(selection);

            let join = tokio::spawn(async move {
                worker_loop(worker, dispatcher, cursor, idle_interval, &mut rx).await;
            });
            joins.push(join);
        }

        tracing::info!(workers = n, "dispatch workers started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub(crate) fn abort_handles(&self) -> Vec<tokio::task::AbortHandle> {
        self.joins.iter().map(JoinHandle::abort_handle).collect()
    }

    /// Receiver that flips to `true` on shutdown; other loops can follow it.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for every worker to finish its in-flight message.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "dispatch worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    dispatcher: Arc<Dispatcher>,
    mut cursor: LaneCursor,
    idle_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // pop と送信は shutdown と競合させない（in-flight を落とさない）
        let idle = match dispatcher.dispatch_next(worker, &mut cursor).await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(worker, error = %err, "lane pop failed, backing off");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // pool handle dropped
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(idle_interval) => {}
            }
        }
    }

    tracing::debug!(worker, "dispatch worker stopped");
}
