use crate::domain::{failure::StepFailure, step_id::StepId};

/// Receives exceptions observed while executing steps
///
/// Fire-and-forget: implementations must not fail and must not block for
/// long, since they run inline with step execution.
pub trait TelemetrySink: Send + Sync {
    /// Record an exception raised by a step
    fn record_exception(&self, step_id: &StepId, failure: &StepFailure);
}

/// Telemetry sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_exception(&self, _step_id: &StepId, _failure: &StepFailure) {}
}
