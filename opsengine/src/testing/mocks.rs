//! Scripted steps and storage fakes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{LastError, StorageError};
use crate::operation::{ManagedOperation, Operation, OperationState};
use crate::step::{Step, StepFailure, StepOutcome, StepResult};
use crate::storage::{InMemoryOperationStorage, OperationStorage};

/// A shared, ordered record of step invocations.
pub type StepLog = Arc<Mutex<Vec<String>>>;

/// A step that records its invocation and succeeds.
#[derive(Debug)]
pub struct TrackingStep {
    name: String,
    log: StepLog,
}

impl TrackingStep {
    /// Creates a new tracking step writing to the shared log.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StepLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Step for TrackingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        self.log.lock().push(self.name.clone());
        Ok(StepOutcome::Done(operation))
    }
}

/// A step that asks for one delayed retry, then succeeds.
#[derive(Debug)]
pub struct RequeueOnceStep {
    name: String,
    log: StepLog,
    delay: Duration,
    attempts: AtomicUsize,
}

impl RequeueOnceStep {
    /// Creates a step that requeues once with the given delay.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StepLog, delay: Duration) -> Self {
        Self {
            name: name.into(),
            log,
            delay,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns how often the step has run.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for RequeueOnceStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        self.log.lock().push(self.name.clone());
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(StepOutcome::Requeue {
                operation,
                after: self.delay,
            })
        } else {
            Ok(StepOutcome::Done(operation))
        }
    }
}

/// A step that always fails with a classified step error.
#[derive(Debug)]
pub struct FailingStep {
    name: String,
    message: String,
}

impl FailingStep {
    /// Creates a step failing with the given message.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        let error = LastError::step_failure(&self.name, &self.message);
        Err(StepFailure::new(operation, error))
    }
}

/// A step that flips the operation into the given state, simulating a step
/// that resolved the operation itself.
#[derive(Debug)]
pub struct TerminalStep {
    name: String,
    state: OperationState,
    log: StepLog,
}

impl TerminalStep {
    /// Creates a step that sets the given terminal state.
    #[must_use]
    pub fn new(name: impl Into<String>, state: OperationState, log: StepLog) -> Self {
        Self {
            name: name.into(),
            state,
            log,
        }
    }
}

#[async_trait]
impl Step for TerminalStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut operation: Operation) -> StepResult {
        self.log.lock().push(self.name.clone());
        operation.state = self.state;
        Ok(StepOutcome::Done(operation))
    }
}

/// In-memory storage with scripted failures, for exercising the conflict
/// retry and transient-backoff paths.
#[derive(Debug)]
pub struct FlakyStorage<O> {
    inner: InMemoryOperationStorage<O>,
    conflict_updates: AtomicUsize,
    unavailable_updates: AtomicUsize,
    unavailable_gets: AtomicUsize,
}

impl<O: ManagedOperation> FlakyStorage<O> {
    /// Creates a healthy store; failures are armed per call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: InMemoryOperationStorage::new(),
            conflict_updates: AtomicUsize::new(0),
            unavailable_updates: AtomicUsize::new(0),
            unavailable_gets: AtomicUsize::new(0),
        }
    }

    /// Makes the next `n` updates fail with a version conflict.
    pub fn fail_next_updates_with_conflict(&self, n: usize) {
        self.conflict_updates.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` updates fail as unavailable.
    pub fn fail_next_updates_with_unavailable(&self, n: usize) {
        self.unavailable_updates.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` loads fail as unavailable.
    pub fn fail_next_gets(&self, n: usize) {
        self.unavailable_gets.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<O: ManagedOperation> OperationStorage<O> for FlakyStorage<O> {
    async fn get(&self, id: &str) -> Result<O, StorageError> {
        if Self::take(&self.unavailable_gets) {
            return Err(StorageError::Unavailable("injected get failure".to_string()));
        }
        self.inner.get(id).await
    }

    async fn insert(&self, operation: O) -> Result<(), StorageError> {
        self.inner.insert(operation).await
    }

    async fn update(&self, operation: O) -> Result<O, StorageError> {
        if Self::take(&self.conflict_updates) {
            return Err(StorageError::Conflict {
                id: operation.id().to_string(),
                expected: operation.version(),
                actual: operation.version() + 1,
            });
        }
        if Self::take(&self.unavailable_updates) {
            return Err(StorageError::Unavailable(
                "injected update failure".to_string(),
            ));
        }
        self.inner.update(operation).await
    }
}
