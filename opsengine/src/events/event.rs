//! Typed events published by the engine.

use serde::Serialize;

use crate::operation::Operation;

/// An event published by the staged manager.
///
/// Fire-and-forget: consumers (metrics collectors, audit logs) live outside
/// the engine and must never influence pipeline control flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A step invocation finished (successfully, with a retry request, or
    /// with an error). Published for every invocation.
    StepProcessed {
        /// The operation id.
        operation_id: String,
        /// The targeted instance.
        instance_id: String,
        /// The enclosing stage.
        stage: String,
        /// The step that ran.
        step: String,
        /// Wall-clock duration of the invocation in milliseconds.
        duration_ms: u64,
        /// The delay the step asked for, zero if none.
        requeue_after_ms: u64,
        /// The step's error message, if it failed.
        error: Option<String>,
    },

    /// A step failed and the pipeline run stopped.
    StepFailed {
        /// The operation id.
        operation_id: String,
        /// The targeted instance.
        instance_id: String,
        /// The enclosing stage.
        stage: String,
        /// The failing step.
        step: String,
        /// The classified error message.
        error: String,
    },

    /// The pipeline completed all stages.
    OperationSucceeded {
        /// The operation id.
        operation_id: String,
        /// The targeted instance.
        instance_id: String,
    },

    /// The operation exceeded its global processing window.
    OperationTimedOut {
        /// The operation id.
        operation_id: String,
        /// The targeted instance.
        instance_id: String,
        /// The operation's age when the timeout fired, in seconds.
        age_secs: u64,
    },
}

impl EngineEvent {
    /// Builds a step-processed event from an operation snapshot.
    #[must_use]
    pub fn step_processed(
        operation: &Operation,
        stage: &str,
        step: &str,
        duration: std::time::Duration,
        requeue_after: std::time::Duration,
        error: Option<String>,
    ) -> Self {
        Self::StepProcessed {
            operation_id: operation.id.clone(),
            instance_id: operation.instance_id.clone(),
            stage: stage.to_string(),
            step: step.to_string(),
            duration_ms: duration.as_millis() as u64,
            requeue_after_ms: requeue_after.as_millis() as u64,
            error,
        }
    }

    /// The event's type tag, as used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepProcessed { .. } => "step_processed",
            Self::StepFailed { .. } => "step_failed",
            Self::OperationSucceeded { .. } => "operation_succeeded",
            Self::OperationTimedOut { .. } => "operation_timed_out",
        }
    }

    /// The id of the operation the event concerns.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        match self {
            Self::StepProcessed { operation_id, .. }
            | Self::StepFailed { operation_id, .. }
            | Self::OperationSucceeded { operation_id, .. }
            | Self::OperationTimedOut { operation_id, .. } => operation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_step_processed_snapshot() {
        let op = Operation::new("instance-1");
        let event = EngineEvent::step_processed(
            &op,
            "stage-1",
            "first",
            Duration::from_millis(12),
            Duration::ZERO,
            None,
        );

        assert_eq!(event.kind(), "step_processed");
        assert_eq!(event.operation_id(), op.id);
        match event {
            EngineEvent::StepProcessed {
                stage,
                step,
                duration_ms,
                requeue_after_ms,
                error,
                ..
            } => {
                assert_eq!(stage, "stage-1");
                assert_eq!(step, "first");
                assert_eq!(duration_ms, 12);
                assert_eq!(requeue_after_ms, 0);
                assert!(error.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serialize_tagged() {
        let event = EngineEvent::OperationSucceeded {
            operation_id: "op-1".to_string(),
            instance_id: "instance-1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "operation_succeeded");
        assert_eq!(json["operation_id"], "op-1");
    }
}
