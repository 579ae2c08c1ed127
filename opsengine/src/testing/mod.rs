//! Test support: scripted steps, fault-injecting storage and fixtures.
//!
//! Used by the crate's own tests and available to workflow packages that
//! need to exercise their pipelines without real collaborators.

mod mocks;

pub use mocks::{
    FailingStep, FlakyStorage, RequeueOnceStep, StepLog, TerminalStep, TrackingStep,
};

use chrono::Utc;

use crate::operation::Operation;

/// Creates an in-progress operation whose `created_at` lies `age` in the
/// past, for exercising the global timeout path.
#[must_use]
pub fn aged_operation(instance_id: &str, age: chrono::Duration) -> Operation {
    let mut operation = Operation::new(instance_id);
    operation.created_at = Utc::now() - age;
    operation.updated_at = operation.created_at;
    operation
}
