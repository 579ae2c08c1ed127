//! The staged pipeline executor.
//!
//! A [`StagedManager`] drives one operation per invocation through an
//! ordered list of named stages, each an ordered list of conditional
//! steps. Finished stages are checkpointed on the operation so processing
//! resumes after a crash without re-running completed work. Short step
//! retries are amortized in-process under a wall-clock ceiling; longer
//! waits are handed back to the queue as a requeue delay.

mod builder;


pub use builder::StagedManagerBuilder;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::errors::{EngineError, LastError};
use crate::events::{EngineEvent, EventPublisher};
use crate::manager::OperationManager;
use crate::operation::{ManagedOperation, Operation, OperationState};
use crate::queue::Executor;
use crate::step::{Step, StepCondition, StepFailure, StepOutcome, StepResult};
use crate::storage::OperationStorage;

/// A step plus the predicate deciding whether it runs.
pub(crate) struct ConditionalStep {
    pub(crate) step: Arc<dyn Step>,
    pub(crate) condition: Option<StepCondition>,
}

impl ConditionalStep {
    fn applies_to(&self, operation: &Operation) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition(operation))
    }
}

/// A named, ordered group of steps; the unit of checkpointing.
pub(crate) struct Stage {
    pub(crate) name: String,
    pub(crate) steps: Vec<ConditionalStep>,
}

/// Executes one operation's pipeline until it blocks, completes or fails.
pub struct StagedManager {
    name: String,
    storage: Arc<dyn OperationStorage<Operation>>,
    publisher: Arc<dyn EventPublisher>,
    operations: OperationManager<Operation>,
    stages: Vec<Stage>,
    config: EngineConfig,
}

impl std::fmt::Debug for StagedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedManager")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl StagedManager {
    /// Starts building a staged manager for the named workflow.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        storage: Arc<dyn OperationStorage<Operation>>,
        publisher: Arc<dyn EventPublisher>,
    ) -> StagedManagerBuilder {
        StagedManagerBuilder::new(name, storage, publisher)
    }

    pub(crate) fn assemble(
        name: String,
        storage: Arc<dyn OperationStorage<Operation>>,
        publisher: Arc<dyn EventPublisher>,
        stages: Vec<Stage>,
        config: EngineConfig,
    ) -> Self {
        let operations =
            OperationManager::new(storage.clone()).with_backoff(config.storage_backoff());
        Self {
            name,
            storage,
            publisher,
            operations,
            stages,
            config,
        }
    }

    /// The workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The defined stage names, in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    async fn process(&self, operation_id: &str) -> Result<Duration, EngineError> {
        let operation = match self.storage.get(operation_id).await {
            Ok(operation) => operation,
            Err(err) => {
                warn!(
                    pipeline = %self.name,
                    operation_id,
                    error = %err,
                    "unable to load operation, revisiting shortly"
                );
                return Ok(self.config.storage_backoff());
            }
        };

        if operation.state.is_terminal() {
            debug!(
                pipeline = %self.name,
                operation_id,
                state = %operation.state,
                "operation already terminal, nothing to do"
            );
            return Ok(Duration::ZERO);
        }

        let timeout = self.config.operation_timeout();
        let window = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        if operation.age(Utc::now()) > window {
            return self.fail_timed_out(operation, timeout).await;
        }

        let mut operation = operation;
        for stage in &self.stages {
            if operation.stage_finished(&stage.name) {
                continue;
            }

            for entry in &stage.steps {
                if !entry.applies_to(&operation) {
                    continue;
                }

                match self.run_step(&stage.name, entry, operation).await {
                    Ok(StepOutcome::Done(op)) => {
                        if op.state.is_terminal() {
                            debug!(
                                pipeline = %self.name,
                                operation_id = %op.id,
                                state = %op.state,
                                "step resolved the operation, stopping pipeline"
                            );
                            if op.state == OperationState::Succeeded {
                                self.publish_succeeded(&op).await;
                            }
                            return Ok(Duration::ZERO);
                        }
                        operation = op;
                    }
                    Ok(StepOutcome::Requeue { after, .. }) => {
                        return Ok(after);
                    }
                    Err(failure) => {
                        return self.fail_step(&stage.name, failure).await;
                    }
                }
            }

            operation = match self
                .operations
                .update_operation(operation, |op| op.finish_stage(&stage.name))
                .await
            {
                Ok(operation) => {
                    debug!(
                        pipeline = %self.name,
                        operation_id = %operation.id,
                        stage = %stage.name,
                        "stage checkpointed"
                    );
                    operation
                }
                Err(err) => {
                    warn!(
                        pipeline = %self.name,
                        operation_id,
                        stage = %stage.name,
                        error = %err,
                        "unable to checkpoint stage, revisiting shortly"
                    );
                    return Ok(self.config.storage_backoff());
                }
            };
        }

        match self
            .operations
            .operation_succeeded(operation, "all stages completed")
            .await
        {
            Ok(StepOutcome::Done(operation)) => {
                self.publish_succeeded(&operation).await;
                Ok(Duration::ZERO)
            }
            Ok(StepOutcome::Requeue { after, .. }) => Ok(after),
            Err(failure) => {
                let error = failure.error;
                Err(EngineError::StepFailed {
                    step: error.component,
                    message: error.message,
                })
            }
        }
    }

    /// Runs one step, amortizing short retries in-process.
    ///
    /// A requeue request is re-invoked in place after the (speed-scaled)
    /// delay until the wall-clock ceiling is reached; then the last
    /// requested delay is handed back to the queue. Every invocation
    /// publishes a step-processed event.
    async fn run_step(
        &self,
        stage: &str,
        entry: &ConditionalStep,
        operation: Operation,
    ) -> StepResult {
        let loop_started = Instant::now();
        let mut operation = operation;

        loop {
            let attempt_started = Instant::now();
            let result = entry.step.run(operation).await;
            let duration = attempt_started.elapsed();

            match result {
                Ok(StepOutcome::Done(op)) => {
                    self.publisher
                        .publish(EngineEvent::step_processed(
                            &op,
                            stage,
                            entry.step.name(),
                            duration,
                            Duration::ZERO,
                            None,
                        ))
                        .await;
                    return Ok(StepOutcome::Done(op));
                }
                Ok(StepOutcome::Requeue {
                    operation: op,
                    after,
                }) => {
                    self.publisher
                        .publish(EngineEvent::step_processed(
                            &op,
                            stage,
                            entry.step.name(),
                            duration,
                            after,
                            None,
                        ))
                        .await;

                    if loop_started.elapsed() + after > self.config.retry_ceiling() {
                        debug!(
                            pipeline = %self.name,
                            operation_id = %op.id,
                            step = entry.step.name(),
                            after_ms = after.as_millis() as u64,
                            "in-process retry ceiling reached, handing back to the queue"
                        );
                        return Ok(StepOutcome::Requeue {
                            operation: op,
                            after,
                        });
                    }

                    debug!(
                        pipeline = %self.name,
                        operation_id = %op.id,
                        step = entry.step.name(),
                        after_ms = after.as_millis() as u64,
                        "re-invoking step in place"
                    );
                    tokio::time::sleep(self.config.scale(after)).await;
                    operation = op;
                }
                Err(failure) => {
                    self.publisher
                        .publish(EngineEvent::step_processed(
                            &failure.operation,
                            stage,
                            entry.step.name(),
                            duration,
                            Duration::ZERO,
                            Some(failure.error.to_string()),
                        ))
                        .await;
                    return Err(failure);
                }
            }
        }
    }

    async fn fail_step(
        &self,
        stage: &str,
        failure: StepFailure,
    ) -> Result<Duration, EngineError> {
        let StepFailure { operation, error } = failure;

        // Terminal failures were already persisted by operation_failed;
        // for raw step errors only the error trail is written.
        let snapshot = if operation.state.is_terminal() {
            operation
        } else {
            let recorded = error.clone();
            match self
                .operations
                .update_operation(operation.clone(), move |op| {
                    op.last_error = Some(recorded.clone());
                })
                .await
            {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(
                        pipeline = %self.name,
                        operation_id = %operation.id,
                        error = %err,
                        "unable to persist step error"
                    );
                    operation
                }
            }
        };

        self.publisher
            .publish(EngineEvent::StepFailed {
                operation_id: snapshot.id.clone(),
                instance_id: snapshot.instance_id.clone(),
                stage: stage.to_string(),
                step: error.component.clone(),
                error: error.to_string(),
            })
            .await;

        Err(EngineError::StepFailed {
            step: error.component,
            message: error.message,
        })
    }

    async fn fail_timed_out(
        &self,
        operation: Operation,
        timeout: Duration,
    ) -> Result<Duration, EngineError> {
        let age_secs = operation.age(Utc::now()).num_seconds().max(0) as u64;
        let error = LastError::timeout(
            &self.name,
            format!(
                "operation exceeded the {}s processing window",
                timeout.as_secs()
            ),
        );

        let recorded = error.clone();
        let stored = match self
            .operations
            .update_operation(operation.clone(), move |op| {
                op.set_state(OperationState::Failed);
                op.last_error = Some(recorded.clone());
                op.append_description("operation timed out");
            })
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    pipeline = %self.name,
                    operation_id = %operation.id,
                    error = %err,
                    "unable to persist timeout, revisiting shortly"
                );
                return Ok(self.config.storage_backoff());
            }
        };

        warn!(
            pipeline = %self.name,
            operation_id = %stored.id,
            age_secs,
            "operation timed out"
        );
        self.publisher
            .publish(EngineEvent::OperationTimedOut {
                operation_id: stored.id.clone(),
                instance_id: stored.instance_id.clone(),
                age_secs,
            })
            .await;

        Err(EngineError::Timeout {
            id: stored.id,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn publish_succeeded(&self, operation: &Operation) {
        self.publisher
            .publish(EngineEvent::OperationSucceeded {
                operation_id: operation.id.clone(),
                instance_id: operation.instance_id.clone(),
            })
            .await;
    }
}

#[async_trait]
impl Executor for StagedManager {
    async fn execute(&self, operation_id: &str) -> Result<Duration, EngineError> {
        self.process(operation_id).await
    }
}
