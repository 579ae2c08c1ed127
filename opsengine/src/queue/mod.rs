//! The operation queue and its worker pool.
//!
//! Workers pull operation ids, hand them to the executor, and either
//! re-enqueue with the returned delay or forget the id. A panic while
//! processing one id is caught and logged; the worker moves on.

mod delaying;

pub use delaying::DelayingQueue;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::errors::EngineError;

/// One processing pass over an operation.
///
/// Implemented by the staged manager. A zero delay means the operation is
/// finished (or must not be retried automatically); a positive delay asks
/// the queue to re-enqueue the id after that long.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Processes the operation once, returning the requeue delay.
    async fn execute(&self, operation_id: &str) -> Result<Duration, EngineError>;
}

/// Dispatches queued operation ids to a pool of workers.
pub struct OperationQueue {
    name: String,
    executor: Arc<dyn Executor>,
    queue: Arc<DelayingQueue>,
}

impl OperationQueue {
    /// Creates a queue feeding the given executor.
    #[must_use]
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            executor,
            queue: Arc::new(DelayingQueue::new()),
        }
    }

    /// The queue's name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues an operation id for processing.
    ///
    /// Duplicate adds while the id is queued or mid-processing coalesce
    /// into a single pass.
    pub fn add(&self, operation_id: &str) {
        self.queue.add(operation_id);
    }

    /// Enqueues an operation id after a delay.
    pub fn add_after(&self, operation_id: &str, delay: Duration) {
        self.queue.add_after(operation_id, delay);
    }

    /// Starts `workers` independent worker loops.
    ///
    /// The returned set joins once [`Self::shut_down`] is called and the
    /// pending queue is drained.
    #[must_use]
    pub fn run(&self, workers: usize) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for index in 0..workers {
            let name = self.name.clone();
            let queue = Arc::clone(&self.queue);
            let executor = Arc::clone(&self.executor);
            set.spawn(worker_loop(index, name, queue, executor));
        }
        set
    }

    /// Stops accepting new work and unblocks the worker loops.
    pub fn shut_down(&self) {
        debug!(queue = %self.name, "shutting down");
        self.queue.shut_down();
    }

    /// Number of ids waiting to be claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no ids are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

async fn worker_loop(
    index: usize,
    name: String,
    queue: Arc<DelayingQueue>,
    executor: Arc<dyn Executor>,
) {
    debug!(queue = %name, worker = index, "worker started");
    while let Some(operation_id) = queue.get().await {
        let result = AssertUnwindSafe(executor.execute(&operation_id))
            .catch_unwind()
            .await;
        queue.done(&operation_id);

        match result {
            Ok(Ok(delay)) if !delay.is_zero() => {
                debug!(
                    queue = %name,
                    worker = index,
                    operation_id = %operation_id,
                    delay_ms = delay.as_millis() as u64,
                    "re-enqueueing after delay"
                );
                queue.add_after(&operation_id, delay);
            }
            Ok(Ok(_)) => {
                debug!(
                    queue = %name,
                    worker = index,
                    operation_id = %operation_id,
                    "operation finished, forgetting"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    queue = %name,
                    worker = index,
                    operation_id = %operation_id,
                    error = %err,
                    "processing failed"
                );
            }
            Err(payload) => {
                error!(
                    queue = %name,
                    worker = index,
                    operation_id = %operation_id,
                    panic = %panic_message(payload.as_ref()),
                    "panic while processing operation"
                );
            }
        }
    }
    debug!(queue = %name, worker = index, "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
