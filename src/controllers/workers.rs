//! Supervised pool of reconcile workers

use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::queue::WorkQueue;
use crate::reconcilers::Reconcile;

/// Calls [`WorkQueue::done`] when dropped, including while unwinding
struct DoneGuard<'a, K>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
{
    queue: &'a WorkQueue<K>,
    key: K,
}

impl<K> Drop for DoneGuard<'_, K>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// Fixed-size set of workers draining one queue
pub struct WorkerPool<K, R> {
    queue: WorkQueue<K>,
    reconciler: Arc<R>,
    workers: usize,
    max_retries: u32,
    restart_delay: Duration,
}

impl<K, R> WorkerPool<K, R>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    R: Reconcile<K>,
{
    pub fn new(queue: WorkQueue<K>, reconciler: Arc<R>, workers: usize) -> Self {
        Self {
            queue,
            reconciler,
            workers,
            max_retries: 10,
            restart_delay: Duration::from_secs(1),
        }
    }

    /// Consecutive failures after which a key is dropped
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Pause before restarting a worker whose loop panicked
    pub fn with_restart_delay(mut self, restart_delay: Duration) -> Self {
        self.restart_delay = restart_delay;
        self
    }

    /// Run the workers until `shutdown` is cancelled
    ///
    /// On cancellation the queue is shut down; reconciles already in flight
    /// finish before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            queue = self.queue.name(),
            workers = self.workers,
            "Starting workers"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(supervise(
                id,
                self.queue.clone(),
                Arc::clone(&self.reconciler),
                self.max_retries,
                self.restart_delay,
                shutdown.clone(),
            ));
        }

        shutdown.cancelled().await;
        info!(queue = self.queue.name(), "Shutting down workers");
        self.queue.shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker supervisor failed");
            }
        }
        info!(queue = self.queue.name(), "All workers stopped");
    }
}

/// Keep one worker loop alive, restarting it after a panic
async fn supervise<K, R>(
    id: usize,
    queue: WorkQueue<K>,
    reconciler: Arc<R>,
    max_retries: u32,
    restart_delay: Duration,
    shutdown: CancellationToken,
) where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    R: Reconcile<K>,
{
    loop {
        let worker = tokio::spawn(worker_loop(
            id,
            queue.clone(),
            Arc::clone(&reconciler),
            max_retries,
        ));

        match worker.await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                error!(worker = id, "Worker panicked, restarting");
                metrics::WORKER_RESTARTS
                    .with_label_values(&[queue.name()])
                    .inc();
            }
            Err(e) => {
                warn!(worker = id, error = %e, "Worker task cancelled");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn worker_loop<K, R>(id: usize, queue: WorkQueue<K>, reconciler: Arc<R>, max_retries: u32)
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    R: Reconcile<K>,
{
    debug!(worker = id, "Worker started");
    while process_next_item(&queue, reconciler.as_ref(), max_retries).await {}
    debug!(worker = id, "Work queue shut down, worker exiting");
}

/// Process one key; returns `false` once the queue is shutting down
///
/// A panicking reconcile counts as a failed attempt: the key is requeued
/// under the retry ceiling and the panic is resumed so the supervisor
/// restarts the loop.
async fn process_next_item<K, R>(queue: &WorkQueue<K>, reconciler: &R, max_retries: u32) -> bool
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    R: Reconcile<K> + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };
    let _done = DoneGuard {
        queue,
        key: key.clone(),
    };

    match AssertUnwindSafe(reconciler.reconcile(&key)).catch_unwind().await {
        Ok(Ok(())) => queue.forget(&key),
        Ok(Err(e)) => handle_error(queue, key, &e, e.is_retriable(), max_retries),
        Err(payload) => {
            handle_error(queue, key, &"reconciler panicked", true, max_retries);
            panic::resume_unwind(payload);
        }
    }
    true
}

fn handle_error<K>(
    queue: &WorkQueue<K>,
    key: K,
    error: &dyn fmt::Display,
    retriable: bool,
    max_retries: u32,
) where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
{
    let attempts = queue.num_requeues(&key);

    if !retriable {
        error!(key = %key, error = %error, "Dropping key after permanent error");
    } else if attempts >= max_retries {
        error!(
            key = %key,
            error = %error,
            attempts = attempts + 1,
            "Dropping key after too many failed reconciles"
        );
    } else {
        warn!(
            key = %key,
            error = %error,
            attempt = attempts + 1,
            "Reconciliation failed, scheduling retry"
        );
        queue.add_rate_limited(key);
        return;
    }

    metrics::DROPPED_KEYS
        .with_label_values(&[queue.name()])
        .inc();
    queue.forget(&key);
}
