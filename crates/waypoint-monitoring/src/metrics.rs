//! Step metrics, reported as log events.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use waypoint_core::{
    CoreError, DomainEventHandler, FlowEvent, ResultState, StepId, TaskExecutionResult,
};

/// Flow engine specific metrics
pub struct FlowMetrics;

impl FlowMetrics {
    /// Record a step that ran live
    pub fn record_step_execution(step_id: &StepId, duration_ms: u64, result: &TaskExecutionResult) {
        info!(
            "Step Execution: step={}, duration={}ms, result={:?}, flow={:?}",
            step_id, duration_ms, result.result_state, result.flow_state
        );
    }

    /// Record a step replayed from history
    pub fn record_step_replay(step_id: &StepId) {
        info!("Step Replay: step={}", step_id);
    }

    /// Record a halted flow
    pub fn record_flow_halt(flow_instance_id: &str, step_id: &StepId, waiting_for_input: bool) {
        info!(
            "Flow Halt: flow={}, step={}, waiting_for_input={}",
            flow_instance_id, step_id, waiting_for_input
        );
    }
}

/// Counter values at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Steps that ran and succeeded
    pub steps_succeeded: u64,
    /// Steps that ran and failed
    pub steps_failed: u64,
    /// Steps replayed from history
    pub steps_replayed: u64,
    /// Attempts that halted
    pub flows_halted: u64,
}

/// Domain event handler keeping step counters
#[derive(Debug, Default)]
pub struct MetricsEventHandler {
    steps_succeeded: AtomicU64,
    steps_failed: AtomicU64,
    steps_replayed: AtomicU64,
    flows_halted: AtomicU64,
}

impl MetricsEventHandler {
    /// Create a handler with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            steps_succeeded: self.steps_succeeded.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
            steps_replayed: self.steps_replayed.load(Ordering::Relaxed),
            flows_halted: self.flows_halted.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DomainEventHandler for MetricsEventHandler {
    async fn handle_event(&self, event: &FlowEvent) -> Result<(), CoreError> {
        match event {
            FlowEvent::StepExecuted {
                step_id,
                result,
                duration_ms,
                ..
            } => {
                let counter = match result.result_state {
                    ResultState::Success => &self.steps_succeeded,
                    ResultState::Fail => &self.steps_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                FlowMetrics::record_step_execution(step_id, *duration_ms, result);
            }
            FlowEvent::StepReplayed { step_id, .. } => {
                self.steps_replayed.fetch_add(1, Ordering::Relaxed);
                FlowMetrics::record_step_replay(step_id);
            }
            FlowEvent::FlowHalted {
                flow_instance_id,
                step_id,
                result,
                ..
            } => {
                self.flows_halted.fetch_add(1, Ordering::Relaxed);
                FlowMetrics::record_flow_halt(&flow_instance_id.0, step_id, result.is_form_task);
            }
        }
        Ok(())
    }
}
