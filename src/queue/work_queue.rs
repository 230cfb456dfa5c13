//! Deduplicating work queue with per-key exclusion and delayed requeues

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::rate_limiter::RateLimiter;
use crate::metrics;

struct State<K> {
    /// Keys waiting to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing; a superset of `queue`
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    available: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
    shutdown: CancellationToken,
}

/// Shared handle to a rate-limited work queue
///
/// A key is in at most one of three places: waiting in the queue, held by a
/// worker, or parked on a delay timer. Adding a key that is already waiting
/// is a no-op; adding a key that is being processed marks it dirty so that it
/// is handed out again once [`WorkQueue::done`] is called, never to two
/// workers at once.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                available: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_depth(&self, depth: usize) {
        metrics::QUEUE_DEPTH
            .with_label_values(&[self.inner.name.as_str()])
            .set(depth as f64);
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(key = %key, "Key already pending");
            return;
        }
        metrics::QUEUE_ADDS
            .with_label_values(&[self.inner.name.as_str()])
            .inc();
        if state.processing.contains(&key) {
            trace!(key = %key, "Key in flight, will be redelivered");
            return;
        }
        state.queue.push_back(key);
        self.record_depth(state.queue.len());
        drop(state);
        self.inner.available.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key),
                _ = shutdown.cancelled() => {}
            }
        });
    }

    /// Requeue `key` after the delay chosen by the rate limiter
    pub fn add_rate_limited(&self, key: K) {
        if self.is_shutting_down() {
            return;
        }
        let delay = self.inner.rate_limiter.when(&key);
        debug!(key = %key, delay = ?delay, "Requeueing with backoff");
        metrics::QUEUE_RETRIES
            .with_label_values(&[self.inner.name.as_str()])
            .inc();
        self.add_after(key, delay);
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &K) {
        self.inner.rate_limiter.forget(key);
    }

    /// Consecutive failed attempts recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shutting down. The caller owns the
    /// returned key until it passes it to [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so an add or shutdown racing
            // with this check still wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    self.record_depth(state.queue.len());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key`, handing it out again if it was added while in flight
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }
        state.queue.push_back(key.clone());
        self.record_depth(state.queue.len());
        drop(state);
        self.inner.available.notify_one();
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!(queue = %self.inner.name, "Shutting down work queue");
        self.inner.shutdown.cancel();
        self.inner.available.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
