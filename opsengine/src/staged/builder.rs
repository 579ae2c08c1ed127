//! Builder for staged pipeline definitions.

use std::sync::Arc;

use super::{ConditionalStep, Stage, StagedManager};
use crate::config::EngineConfig;
use crate::errors::DefinitionError;
use crate::events::EventPublisher;
use crate::operation::Operation;
use crate::step::Step;
use crate::storage::OperationStorage;

/// Builds a [`StagedManager`] from an ordered stage/step definition.
///
/// Stages execute in the order they are declared; steps within a stage in
/// the order they are added. `build` rejects empty pipelines, duplicate
/// stage names, empty stages and steps declared before any stage.
pub struct StagedManagerBuilder {
    name: String,
    storage: Arc<dyn OperationStorage<Operation>>,
    publisher: Arc<dyn EventPublisher>,
    config: EngineConfig,
    stages: Vec<Stage>,
    orphan_steps: Vec<String>,
}

impl StagedManagerBuilder {
    /// Creates a builder for the named workflow.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn OperationStorage<Operation>>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            publisher,
            config: EngineConfig::default(),
            stages: Vec::new(),
            orphan_steps: Vec::new(),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens a new stage; subsequent steps are added to it.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>) -> Self {
        self.stages.push(Stage {
            name: name.into(),
            steps: Vec::new(),
        });
        self
    }

    /// Adds an unconditional step to the current stage.
    #[must_use]
    pub fn step(self, step: Arc<dyn Step>) -> Self {
        self.push_step(step, None)
    }

    /// Adds a step that only runs when the predicate holds for the
    /// operation snapshot.
    #[must_use]
    pub fn step_when<F>(self, step: Arc<dyn Step>, condition: F) -> Self
    where
        F: Fn(&Operation) -> bool + Send + Sync + 'static,
    {
        self.push_step(step, Some(Arc::new(condition)))
    }

    fn push_step(
        mut self,
        step: Arc<dyn Step>,
        condition: Option<crate::step::StepCondition>,
    ) -> Self {
        match self.stages.last_mut() {
            Some(stage) => stage.steps.push(ConditionalStep { step, condition }),
            None => self.orphan_steps.push(step.name().to_string()),
        }
        self
    }

    /// Validates the definition and builds the manager.
    pub fn build(self) -> Result<StagedManager, DefinitionError> {
        if let Some(step) = self.orphan_steps.first() {
            return Err(DefinitionError::new(
                &self.name,
                format!("step '{step}' was added before any stage"),
            ));
        }
        if self.stages.is_empty() {
            return Err(DefinitionError::new(&self.name, "no stages defined"));
        }

        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(DefinitionError::new(
                    &self.name,
                    format!("duplicate stage '{}'", stage.name),
                ));
            }
            if stage.steps.is_empty() {
                return Err(DefinitionError::new(
                    &self.name,
                    format!("stage '{}' has no steps", stage.name),
                ));
            }
        }

        Ok(StagedManager::assemble(
            self.name,
            self.storage,
            self.publisher,
            self.stages,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventPublisher;
    use crate::storage::InMemoryOperationStorage;
    use crate::testing::{StepLog, TrackingStep};
    use parking_lot::Mutex;

    fn deps() -> (
        Arc<InMemoryOperationStorage<Operation>>,
        Arc<NoOpEventPublisher>,
    ) {
        (
            Arc::new(InMemoryOperationStorage::new()),
            Arc::new(NoOpEventPublisher),
        )
    }

    fn tracking(name: &str) -> Arc<dyn Step> {
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        Arc::new(TrackingStep::new(name, log))
    }

    #[test]
    fn test_build_valid_pipeline() {
        let (storage, publisher) = deps();
        let manager = StagedManager::builder("provisioning", storage, publisher)
            .stage("start")
            .step(tracking("first"))
            .stage("create")
            .step(tracking("second"))
            .build()
            .unwrap();

        assert_eq!(manager.name(), "provisioning");
        assert_eq!(manager.stage_names(), vec!["start", "create"]);
    }

    #[test]
    fn test_build_rejects_empty_pipeline() {
        let (storage, publisher) = deps();
        let err = StagedManager::builder("provisioning", storage, publisher)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no stages"));
    }

    #[test]
    fn test_build_rejects_orphan_step() {
        let (storage, publisher) = deps();
        let err = StagedManager::builder("provisioning", storage, publisher)
            .step(tracking("first"))
            .stage("start")
            .step(tracking("second"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("before any stage"));
    }

    #[test]
    fn test_build_rejects_duplicate_stage() {
        let (storage, publisher) = deps();
        let err = StagedManager::builder("provisioning", storage, publisher)
            .stage("start")
            .step(tracking("first"))
            .stage("start")
            .step(tracking("second"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate stage"));
    }

    #[test]
    fn test_build_rejects_empty_stage() {
        let (storage, publisher) = deps();
        let err = StagedManager::builder("provisioning", storage, publisher)
            .stage("start")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("has no steps"));
    }
}
