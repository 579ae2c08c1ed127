//! Event publisher trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, Level};

use super::EngineEvent;

/// Seam for out-of-scope observability collectors.
///
/// Publishing is fire-and-forget; implementations must never fail the
/// caller or block pipeline progress.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event asynchronously.
    async fn publish(&self, event: EngineEvent);

    /// Publishes an event without awaiting. Errors are logged, never raised.
    fn try_publish(&self, event: EngineEvent);
}

/// A publisher that discards all events.
///
/// Used as the default when no collector is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _event: EngineEvent) {
        // Intentionally empty - discards all events
    }

    fn try_publish(&self, _event: EngineEvent) {
        // Intentionally empty - discards all events
    }
}

/// A publisher that logs events through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventPublisher {
    level: Level,
}

impl Default for LoggingEventPublisher {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventPublisher {
    /// Creates a new logging publisher with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging publisher.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &EngineEvent) {
        let payload = serde_json::to_string(event).unwrap_or_else(|_| event.kind().to_string());
        match self.level {
            Level::DEBUG => {
                debug!(
                    event_kind = %event.kind(),
                    operation_id = %event.operation_id(),
                    payload = %payload,
                    "engine event"
                );
            }
            _ => {
                info!(
                    event_kind = %event.kind(),
                    operation_id = %event.operation_id(),
                    payload = %payload,
                    "engine event"
                );
            }
        }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: EngineEvent) {
        self.log_event(&event);
    }

    fn try_publish(&self, event: EngineEvent) {
        self.log_event(&event);
    }
}

/// A collecting publisher for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventPublisher {
    events: parking_lot::RwLock<Vec<EngineEvent>>,
}

impl CollectingEventPublisher {
    /// Creates a new collecting publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type tag.
    #[must_use]
    pub fn events_of_kind(&self, kind: &str) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// Returns the step names of all step-processed events, in order.
    #[must_use]
    pub fn processed_steps(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::StepProcessed { step, .. } => Some(step.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for CollectingEventPublisher {
    async fn publish(&self, event: EngineEvent) {
        self.events.write().push(event);
    }

    fn try_publish(&self, event: EngineEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use std::time::Duration;

    fn sample_event(step: &str) -> EngineEvent {
        let op = Operation::new("instance-1");
        EngineEvent::step_processed(
            &op,
            "stage-1",
            step,
            Duration::from_millis(1),
            Duration::ZERO,
            None,
        )
    }

    #[tokio::test]
    async fn test_noop_publisher() {
        let publisher = NoOpEventPublisher;
        publisher.publish(sample_event("first")).await;
        publisher.try_publish(sample_event("second"));
        // Should not panic
    }

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::default();
        publisher.publish(sample_event("first")).await;
        publisher.try_publish(sample_event("second"));
        // Should not panic
    }

    #[tokio::test]
    async fn test_collecting_publisher() {
        let publisher = CollectingEventPublisher::new();
        assert!(publisher.is_empty());

        publisher.publish(sample_event("first")).await;
        publisher.try_publish(sample_event("second"));

        assert_eq!(publisher.len(), 2);
        assert_eq!(publisher.processed_steps(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_collecting_publisher_filter_and_clear() {
        let publisher = CollectingEventPublisher::new();
        publisher.publish(sample_event("first")).await;
        publisher
            .publish(EngineEvent::OperationSucceeded {
                operation_id: "op-1".to_string(),
                instance_id: "instance-1".to_string(),
            })
            .await;

        assert_eq!(publisher.events_of_kind("step_processed").len(), 1);
        assert_eq!(publisher.events_of_kind("operation_succeeded").len(), 1);

        publisher.clear();
        assert!(publisher.is_empty());
    }
}
