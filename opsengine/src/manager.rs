//! Generic persistence and retry helpers for operations.
//!
//! [`OperationManager`] is the only code path allowed to set an
//! operation's state, description trail or last error. It is generic over
//! [`ManagedOperation`] so every workflow type (provision, deprovision,
//! update, upgrade) shares one implementation while keeping its own
//! operation shape.
//!
//! Failure policy: an optimistic-lock conflict is retried exactly once
//! against a freshly loaded row; any further failure is surfaced as a
//! transient error. Only [`OperationManager::operation_failed`] and the
//! staged manager's timeout path produce a terminal `Failed` state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, LastError};
use crate::operation::{ManagedOperation, OperationState};
use crate::step::{StepFailure, StepOutcome, StepResult};
use crate::storage::OperationStorage;

/// Default delay hinted to callers after a transient persistence failure.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Safe persistence helpers shared by all workflow steps.
pub struct OperationManager<O: ManagedOperation> {
    storage: Arc<dyn OperationStorage<O>>,
    backoff: Duration,
}

impl<O: ManagedOperation> OperationManager<O> {
    /// Creates a manager over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn OperationStorage<O>>) -> Self {
        Self {
            storage,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Sets the delay hinted after a transient persistence failure.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The configured transient-failure backoff.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Applies `mutate` and persists the operation.
    ///
    /// On an optimistic-lock conflict the latest row is fetched, `mutate`
    /// is re-applied and the write is attempted once more. A second
    /// conflict or any other storage error is returned as a transient
    /// [`EngineError`]; it never marks the operation failed.
    pub async fn update_operation<F>(&self, operation: O, mutate: F) -> Result<O, EngineError>
    where
        F: Fn(&mut O) + Send + Sync,
    {
        let id = operation.id().to_string();
        let mut candidate = operation;
        mutate(&mut candidate);

        match self.storage.update(candidate).await {
            Ok(stored) => Ok(stored),
            Err(err) if err.is_conflict() => {
                debug!(operation_id = %id, "version conflict, retrying against latest row");
                let mut latest = self
                    .storage
                    .get(&id)
                    .await
                    .map_err(|e| EngineError::storage(&id, &e))?;
                mutate(&mut latest);
                self.storage.update(latest).await.map_err(|e| {
                    if e.is_conflict() {
                        EngineError::Conflict { id: id.clone() }
                    } else {
                        EngineError::storage(&id, &e)
                    }
                })
            }
            Err(err) => Err(EngineError::storage(&id, &err)),
        }
    }

    /// Marks the operation terminally succeeded and persists it.
    pub async fn operation_succeeded(&self, operation: O, description: &str) -> StepResult<O> {
        let fallback = operation.clone();
        match self
            .update_operation(operation, |op| {
                op.set_state(OperationState::Succeeded);
                op.append_description(description);
            })
            .await
        {
            Ok(stored) => {
                info!(operation_id = %stored.id(), "operation succeeded: {description}");
                Ok(StepOutcome::Done(stored))
            }
            Err(err) => self.requeue_after_persistence_failure(fallback, &err),
        }
    }

    /// Marks the operation terminally failed and persists it.
    ///
    /// Returns a [`StepFailure`] wrapping `cause` with `description`.
    pub async fn operation_failed(
        &self,
        operation: O,
        description: &str,
        cause: LastError,
    ) -> StepResult<O> {
        let failure = cause.wrap(description);
        let fallback = operation.clone();
        match self
            .update_operation(operation, |op| {
                op.set_state(OperationState::Failed);
                op.set_last_error(failure.clone());
                op.append_description(description);
            })
            .await
        {
            Ok(stored) => {
                warn!(operation_id = %stored.id(), error = %failure, "operation failed");
                Err(StepFailure::new(stored, failure))
            }
            Err(err) => self.requeue_after_persistence_failure(fallback, &err),
        }
    }

    /// Asks the caller to wait `interval` and retry, as long as the
    /// operation made persisted progress within the last `max_time`.
    ///
    /// Once the window expires the operation is failed with `cause`.
    pub async fn retry_operation(
        &self,
        operation: O,
        message: &str,
        cause: LastError,
        interval: Duration,
        max_time: Duration,
    ) -> StepResult<O> {
        if self.within_window(&operation, max_time) {
            let mut operation = operation;
            operation.append_description(&format!("retrying: {message}"));
            debug!(
                operation_id = %operation.id(),
                interval_ms = interval.as_millis() as u64,
                "scheduling retry: {message}"
            );
            return Ok(StepOutcome::Requeue {
                operation,
                after: interval,
            });
        }
        self.operation_failed(operation, message, cause).await
    }

    /// Same windowing as [`Self::retry_operation`], but on expiry the
    /// progress trail is persisted and the operation is left in progress,
    /// letting a later stage decide instead of failing hard.
    pub async fn retry_operation_without_fail(
        &self,
        operation: O,
        description: &str,
        interval: Duration,
        max_time: Duration,
    ) -> StepResult<O> {
        if self.within_window(&operation, max_time) {
            return Ok(StepOutcome::Requeue {
                operation,
                after: interval,
            });
        }

        let fallback = operation.clone();
        match self
            .update_operation(operation, |op| op.append_description(description))
            .await
        {
            Ok(stored) => {
                debug!(operation_id = %stored.id(), "retry window expired, giving up silently");
                Ok(StepOutcome::Done(stored))
            }
            Err(err) => self.requeue_after_persistence_failure(fallback, &err),
        }
    }

    fn within_window(&self, operation: &O, max_time: Duration) -> bool {
        let idle = Utc::now().signed_duration_since(operation.updated_at());
        let window = chrono::Duration::from_std(max_time).unwrap_or(chrono::Duration::MAX);
        idle < window
    }

    fn requeue_after_persistence_failure(&self, operation: O, err: &EngineError) -> StepResult<O> {
        warn!(
            operation_id = %operation.id(),
            error = %err,
            backoff_ms = self.backoff.as_millis() as u64,
            "persistence failed, retrying shortly"
        );
        Ok(StepOutcome::Requeue {
            operation,
            after: self.backoff,
        })
    }
}
