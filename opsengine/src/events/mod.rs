//! Engine events and the publisher seam for observability collaborators.

mod event;
mod publisher;

pub use event::EngineEvent;
pub use publisher::{
    CollectingEventPublisher, EventPublisher, LoggingEventPublisher, NoOpEventPublisher,
};
