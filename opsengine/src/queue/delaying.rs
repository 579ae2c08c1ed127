//! Deduplicating, delay-capable work queue.
//!
//! Coalescing rule: an id is never queued twice, and never handed to two
//! workers at once. Adding an id that is mid-processing marks it dirty; it
//! is re-queued when the current pass finishes. This gives "at most one
//! in-flight pass per operation" without per-operation locks.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
}

/// A work queue of operation ids with deduplication and delayed re-adds.
#[derive(Default)]
pub struct DelayingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    shutting_down: AtomicBool,
}

impl DelayingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an id.
    ///
    /// No-op if the id is already queued; if it is mid-processing the id
    /// is re-queued once the current pass calls [`Self::done`]. Ignored
    /// after shutdown.
    pub fn add(&self, id: &str) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.dirty.contains(id) {
                trace!(operation_id = id, "already queued, coalescing");
                return;
            }
            state.dirty.insert(id.to_string());
            if state.processing.contains(id) {
                trace!(operation_id = id, "mid-processing, will re-queue on done");
                return;
            }
            state.queue.push_back(id.to_string());
        }
        self.notify.notify_one();
    }

    /// Enqueues an id after the given delay.
    ///
    /// Must be called from within a tokio runtime; the timer task is a
    /// no-op if the queue shuts down before it fires.
    pub fn add_after(self: &Arc<Self>, id: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(id);
            return;
        }
        let queue = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&id);
        });
    }

    /// Blocks until an id is available and claims it for processing.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(id) = state.queue.pop_front() {
                    state.dirty.remove(&id);
                    state.processing.insert(id.clone());
                    return Some(id);
                }
                if self.shutting_down.load(Ordering::SeqCst) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases an id after a processing pass.
    ///
    /// Re-queues it if it was added again while being processed.
    pub fn done(&self, id: &str) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(id);
            if state.dirty.contains(id) && !self.shutting_down.load(Ordering::SeqCst) {
                state.queue.push_back(id.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stops accepting work and unblocks waiting workers.
    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of ids waiting to be claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no ids are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = DelayingQueue::new();
        queue.add("op-1");
        queue.add("op-1");
        queue.add("op-2");
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_on_done() {
        let queue = DelayingQueue::new();
        queue.add("op-1");

        let claimed = queue.get().await.unwrap();
        assert_eq!(claimed, "op-1");
        assert!(queue.is_empty());

        // Coalesced while in flight.
        queue.add("op-1");
        queue.add("op-1");
        assert!(queue.is_empty());

        queue.done("op-1");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_done_without_dirty_forgets() {
        let queue = DelayingQueue::new();
        queue.add("op-1");
        queue.get().await.unwrap();
        queue.done("op-1");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_after_fires() {
        let queue = Arc::new(DelayingQueue::new());
        queue.add_after("op-1", Duration::from_millis(5));
        let id = queue.get().await.unwrap();
        assert_eq!(id, "op-1");
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work_and_unblocks() {
        let queue = Arc::new(DelayingQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("op-1");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_work() {
        let queue = DelayingQueue::new();
        queue.add("op-1");
        queue.shut_down();

        // Pending work is still handed out before workers stop.
        assert_eq!(queue.get().await.as_deref(), Some("op-1"));
        assert_eq!(queue.get().await, None);
    }
}
