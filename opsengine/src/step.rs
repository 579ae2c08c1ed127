//! The step contract consumed by the staged manager.
//!
//! Steps are supplied by workflow packages; the engine treats them as an
//! opaque capability: run one unit of work against an operation, return the
//! (possibly mutated) operation and either continue, ask to be re-run after
//! a delay, or fail with a classified error.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::LastError;
use crate::operation::Operation;

/// The successful result of one step invocation.
#[derive(Debug, Clone)]
pub enum StepOutcome<O = Operation> {
    /// The step finished; continue with the next step.
    Done(O),
    /// Re-run the same step after the given delay.
    Requeue {
        /// The operation as the step left it.
        operation: O,
        /// How long to wait before the next attempt.
        after: Duration,
    },
}

impl<O> StepOutcome<O> {
    /// Returns the operation carried by the outcome.
    #[must_use]
    pub fn into_operation(self) -> O {
        match self {
            Self::Done(operation) | Self::Requeue { operation, .. } => operation,
        }
    }
}

/// A failed step invocation.
///
/// Carries the operation alongside the error so description and payload
/// mutations made before the failure are not lost.
#[derive(Debug, Clone)]
pub struct StepFailure<O = Operation> {
    /// The operation as the step left it.
    pub operation: O,
    /// The classified error.
    pub error: LastError,
}

impl<O> StepFailure<O> {
    /// Creates a new step failure.
    #[must_use]
    pub fn new(operation: O, error: LastError) -> Self {
        Self { operation, error }
    }
}

/// The result of one step invocation.
pub type StepResult<O = Operation> = Result<StepOutcome<O>, StepFailure<O>>;

/// One unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// The step's name, used in events and the error trail.
    fn name(&self) -> &str;

    /// Runs the step against the operation.
    async fn run(&self, operation: Operation) -> StepResult;
}

/// Predicate deciding whether a step runs for a given operation snapshot.
pub type StepCondition = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;

    #[test]
    fn test_outcome_into_operation() {
        let op = Operation::new("instance-1");
        let id = op.id.clone();

        let done = StepOutcome::Done(op.clone());
        assert_eq!(done.into_operation().id, id);

        let requeue = StepOutcome::Requeue {
            operation: op,
            after: Duration::from_millis(5),
        };
        assert_eq!(requeue.into_operation().id, id);
    }

    #[test]
    fn test_failure_carries_operation() {
        let mut op = Operation::new("instance-1");
        op.append_description("halfway there");

        let failure = StepFailure::new(op, LastError::step_failure("create-runtime", "boom"));
        assert_eq!(failure.operation.description, "halfway there");
        assert_eq!(failure.error.component, "create-runtime");
    }
}
