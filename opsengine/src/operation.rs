//! The persisted operation entity and its state machine.
//!
//! An [`Operation`] is the unit of long-running work: it is created by an
//! endpoint layer, driven through a staged pipeline, and persisted with an
//! integer version for optimistic locking. [`ManagedOperation`] is the
//! capability set the generic persistence helpers need, so workflow types
//! with richer payloads can reuse the same manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::LastError;

/// The lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// The operation is being processed (or waiting to be).
    InProgress,
    /// The pipeline completed all stages.
    Succeeded,
    /// A step failed fatally or the operation timed out.
    Failed,
    /// An external actor withdrew the operation.
    Canceled,
}

impl Default for OperationState {
    fn default() -> Self {
        Self::InProgress
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl OperationState {
    /// Returns true if no further steps may run for this operation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// The persisted unit of long-running work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Immutable identity.
    pub id: String,
    /// The cluster instance this operation targets.
    pub instance_id: String,
    /// Set when the operation was batch-triggered by a campaign.
    pub orchestration_id: Option<String>,
    /// Optimistic-lock version; incremented on every committed write.
    pub version: u64,
    /// Creation time; basis for the global timeout.
    pub created_at: DateTime<Utc>,
    /// Time of the last committed write; basis for retry windows.
    pub updated_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: OperationState,
    /// Human-readable progress trail, appended-to on retries.
    pub description: String,
    /// Classified error of the most recent failed step.
    pub last_error: Option<LastError>,
    /// Ordered, duplicate-free names of fully completed stages.
    pub finished_stages: Vec<String>,
    /// Opaque workflow parameters and results; steps read and mutate it.
    pub payload: serde_json::Value,
}

impl Operation {
    /// Creates a new in-progress operation targeting the given instance.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            orchestration_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            state: OperationState::InProgress,
            description: String::new(),
            last_error: None,
            finished_stages: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the orchestration id.
    #[must_use]
    pub fn with_orchestration_id(mut self, id: impl Into<String>) -> Self {
        self.orchestration_id = Some(id.into());
        self
    }

    /// Sets the workflow payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns true if the named stage has already been checkpointed.
    #[must_use]
    pub fn stage_finished(&self, stage: &str) -> bool {
        self.finished_stages.iter().any(|s| s == stage)
    }

    /// Records the named stage as finished.
    ///
    /// Append-only and idempotent: re-adding a present name is a no-op.
    pub fn finish_stage(&mut self, stage: &str) {
        if !self.stage_finished(stage) {
            self.finished_stages.push(stage.to_string());
        }
    }

    /// Appends a message to the progress trail.
    pub fn append_description(&mut self, message: &str) {
        if message.is_empty() {
            return;
        }
        if self.description.is_empty() {
            self.description = message.to_string();
        } else {
            self.description.push_str("; ");
            self.description.push_str(message);
        }
    }

    /// Returns how long the operation has existed at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Returns how long ago the operation was last persisted at `now`.
    #[must_use]
    pub fn idle(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.updated_at)
    }
}

/// The capability set the generic persistence helpers require.
///
/// Workflow-specific operation types implement this to share one
/// [`crate::manager::OperationManager`]; [`Operation`] is the reference
/// implementation.
pub trait ManagedOperation: Clone + Send + Sync + 'static {
    /// The operation's immutable identity.
    fn id(&self) -> &str;
    /// The optimistic-lock version.
    fn version(&self) -> u64;
    /// Overwrites the optimistic-lock version (storage only).
    fn set_version(&mut self, version: u64);
    /// The current lifecycle state.
    fn state(&self) -> OperationState;
    /// Overwrites the lifecycle state.
    fn set_state(&mut self, state: OperationState);
    /// Time of the last committed write.
    fn updated_at(&self) -> DateTime<Utc>;
    /// Overwrites the last-write timestamp (storage only).
    fn set_updated_at(&mut self, at: DateTime<Utc>);
    /// Appends to the progress trail.
    fn append_description(&mut self, message: &str);
    /// Records the classified error of a failed step.
    fn set_last_error(&mut self, error: LastError);
}

impl ManagedOperation for Operation {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn set_state(&mut self, state: OperationState) {
        self.state = state;
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn append_description(&mut self, message: &str) {
        Operation::append_description(self, message);
    }

    fn set_last_error(&mut self, error: LastError) {
        self.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_operation_defaults() {
        let op = Operation::new("instance-1");
        assert_eq!(op.instance_id, "instance-1");
        assert_eq!(op.version, 0);
        assert_eq!(op.state, OperationState::InProgress);
        assert!(op.finished_stages.is_empty());
        assert!(op.last_error.is_none());
        assert!(!op.id.is_empty());
    }

    #[test]
    fn test_state_terminal() {
        assert!(!OperationState::InProgress.is_terminal());
        assert!(OperationState::Succeeded.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(OperationState::Canceled.is_terminal());
    }

    #[test]
    fn test_state_serialize() {
        let json = serde_json::to_string(&OperationState::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);

        let back: OperationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OperationState::InProgress);
    }

    #[test]
    fn test_finish_stage_idempotent() {
        let mut op = Operation::new("instance-1");
        op.finish_stage("stage-1");
        op.finish_stage("stage-2");
        op.finish_stage("stage-1");

        assert_eq!(op.finished_stages, vec!["stage-1", "stage-2"]);
        assert!(op.stage_finished("stage-1"));
        assert!(!op.stage_finished("stage-3"));
    }

    #[test]
    fn test_append_description_trail() {
        let mut op = Operation::new("instance-1");
        op.append_description("provisioning started");
        op.append_description("retrying: runtime not ready");
        op.append_description("");

        assert_eq!(
            op.description,
            "provisioning started; retrying: runtime not ready"
        );
    }

    #[test]
    fn test_age_and_idle() {
        let mut op = Operation::new("instance-1");
        op.created_at = Utc::now() - chrono::Duration::seconds(30);
        op.updated_at = Utc::now() - chrono::Duration::seconds(5);

        let now = Utc::now();
        assert!(op.age(now) >= chrono::Duration::seconds(29));
        assert!(op.idle(now) < chrono::Duration::seconds(30));
    }

    #[test]
    fn test_builder_style_setters() {
        let op = Operation::new("instance-1")
            .with_orchestration_id("campaign-7")
            .with_payload(serde_json::json!({"plan": "aws"}));

        assert_eq!(op.orchestration_id.as_deref(), Some("campaign-7"));
        assert_eq!(op.payload["plan"], "aws");
    }
}
