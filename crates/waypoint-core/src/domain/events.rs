use crate::domain::flow_context::{FlowInstanceId, TaskExecutionResult};
use crate::domain::step_id::StepId;
use crate::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events in the system
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the flow instance ID this event is associated with
    fn flow_instance_id(&self) -> &FlowInstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Events emitted by the replay engine, one per step invocation
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A step ran its action live
    StepExecuted {
        /// Flow instance
        flow_instance_id: FlowInstanceId,
        /// Step that ran
        step_id: StepId,
        /// Outcome recorded for the step
        result: TaskExecutionResult,
        /// Wall time spent in the action
        duration_ms: u64,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },

    /// A step was replayed from its snapshot without running
    StepReplayed {
        /// Flow instance
        flow_instance_id: FlowInstanceId,
        /// Step that was skipped
        step_id: StepId,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },

    /// Continuation was denied after a step
    FlowHalted {
        /// Flow instance
        flow_instance_id: FlowInstanceId,
        /// Step whose outcome halted the flow
        step_id: StepId,
        /// Outcome that denied continuation
        result: TaskExecutionResult,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent for FlowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::StepExecuted { .. } => "step.executed",
            FlowEvent::StepReplayed { .. } => "step.replayed",
            FlowEvent::FlowHalted { .. } => "flow_instance.halted",
        }
    }

    fn flow_instance_id(&self) -> &FlowInstanceId {
        match self {
            FlowEvent::StepExecuted {
                flow_instance_id, ..
            }
            | FlowEvent::StepReplayed {
                flow_instance_id, ..
            }
            | FlowEvent::FlowHalted {
                flow_instance_id, ..
            } => flow_instance_id,
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FlowEvent::StepExecuted { timestamp, .. }
            | FlowEvent::StepReplayed { timestamp, .. }
            | FlowEvent::FlowHalted { timestamp, .. } => *timestamp,
        }
    }
}

/// Handler for domain events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: &FlowEvent) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let now = Utc::now();
        let event = FlowEvent::StepReplayed {
            flow_instance_id: FlowInstanceId("i-9".to_string()),
            step_id: StepId::new("A", 1),
            timestamp: now,
        };

        assert_eq!(event.event_type(), "step.replayed");
        assert_eq!(event.flow_instance_id().0, "i-9");
        assert_eq!(event.timestamp(), now);
    }
}
