//! Telemetry sink that reports step exceptions as tracing events.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};
use waypoint_core::{StepFailure, StepId, TelemetrySink};

/// Reports every recorded exception as an `error` event
///
/// Explicit stop requests are reported at `info`, since they are the normal
/// way a flow suspends.
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    service_name: String,
    recorded: AtomicU64,
}

impl TracingTelemetry {
    /// Create a sink tagging events with `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            recorded: AtomicU64::new(0),
        }
    }

    /// Number of exceptions recorded so far
    pub fn exceptions_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for TracingTelemetry {
    fn record_exception(&self, step_id: &StepId, failure: &StepFailure) {
        self.recorded.fetch_add(1, Ordering::Relaxed);

        if let StepFailure::StopRequested(message) = failure {
            info!(
                service_name = %self.service_name,
                step_id = %step_id,
                "Stop requested: {}", message
            );
            return;
        }

        error!(
            service_name = %self.service_name,
            step_id = %step_id,
            kind = failure.kind(),
            trace = %failure.trace(),
            "Step exception: {}", failure
        );
    }
}
