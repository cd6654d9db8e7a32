// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deduplicating FIFO of keys awaiting reconciliation.
//!
//! A key is in at most one of two places: the FIFO (queued) or the processing set.
//! Adding a key that is being processed marks it dirty instead; the dirty mark is
//! turned back into a queue entry as soon as the in-flight run reports `done` or
//! `requeue`, so no change that arrives mid-reconciliation is lost.

use super::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct QueueState<T> {
    fifo: VecDeque<T>,
    queued: HashSet<T>,
    processing: HashSet<T>,
    dirty: HashSet<T>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    limiter: Mutex<RateLimiter<T>>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl<T> WorkQueue<T>
where
    T: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(limiter: RateLimiter<T>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                fifo: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                shutting_down: false,
            }),
            limiter: Mutex::new(limiter),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_limiter(&self) -> MutexGuard<'_, RateLimiter<T>> {
        self.limiter.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `key` unless it is already queued. A key that is currently processing
    /// is marked to run again once the current run finishes.
    pub fn add(&self, key: T) {
        let mut state = self.lock();
        if state.shutting_down || state.queued.contains(&key) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(key = ?key, "Key is processing, marking dirty");
            state.dirty.insert(key);
            return;
        }
        state.queued.insert(key.clone());
        state.fifo.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next key and marks it processing. Returns `None` once the
    /// queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.fifo.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finishes processing `key` successfully and clears its retry state.
    pub fn done(&self, key: &T) {
        self.lock_limiter().forget(key);
        self.finish(key);
    }

    /// Finishes processing `key` and adds it back later: after `delay` when given
    /// (a successful run asking to be revisited), otherwise after the rate
    /// limiter's backoff (a failed run).
    pub fn requeue(self: &Arc<Self>, key: T, delay: Option<Duration>) {
        let delay = match delay {
            Some(delay) => {
                self.lock_limiter().forget(&key);
                delay
            }
            None => self.lock_limiter().delay_for(&key),
        };

        if self.finish(&key) {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        trace!(key = ?key, delay_ms = delay.as_millis() as u64, "Scheduling requeue");
        let queue = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Clears the processing mark. A dirty key goes straight back on the queue;
    /// returns whether that happened.
    fn finish(&self, key: &T) -> bool {
        let mut state = self.lock();
        state.processing.remove(key);
        if !state.dirty.remove(key) || state.shutting_down {
            return false;
        }
        state.queued.insert(key.clone());
        state.fifo.push_back(key.clone());
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Wakes every waiting `get`, ignores further adds and cancels delayed requeues.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be picked up.
    pub fn len(&self) -> usize {
        self.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, key: &T) -> bool {
        self.lock().processing.contains(key)
    }

    pub fn num_requeues(&self, key: &T) -> u32 {
        self.lock_limiter().num_requeues(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_queue() -> Arc<WorkQueue<&'static str>> {
        Arc::new(WorkQueue::new(RateLimiter::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
        )))
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let queue = make_queue();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_get_is_fifo() {
        let queue = make_queue();
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_add_while_processing_runs_again_after_done() {
        let queue = make_queue();
        queue.add("a");
        let key = queue.get().await.unwrap();

        queue.add("a");
        assert!(queue.is_empty(), "in-flight key must not be queued twice");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn test_add_while_processing_survives_requeue() {
        let queue = make_queue();
        queue.add("a");
        let key = queue.get().await.unwrap();
        queue.add("a");

        queue.requeue(key, Some(Duration::from_secs(3600)));

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_explicit_delay() {
        let queue = make_queue();
        queue.add("a");
        let key = queue.get().await.unwrap();

        queue.requeue(key, Some(Duration::from_secs(30)));
        assert!(queue.is_empty());
        assert!(!queue.is_processing(&"a"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_requeue_backs_off_and_done_resets() {
        let queue = make_queue();
        queue.add("a");

        for expected in 1..=3 {
            let key = queue.get().await.unwrap();
            queue.requeue(key, None);
            assert_eq!(queue.num_requeues(&"a"), expected);
        }

        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test]
    async fn test_shut_down_wakes_waiters() {
        let queue = make_queue();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down();

        assert_eq!(waiter.await.unwrap(), None);
        queue.add("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = make_queue();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.add("late");

        assert_eq!(waiter.await.unwrap(), Some("late"));
    }
}
