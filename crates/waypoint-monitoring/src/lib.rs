//! Monitoring for the Waypoint engine.
//!
//! Structured logging set up through `tracing-subscriber`, a telemetry sink
//! that turns step exceptions into log events, and an event handler that
//! keeps per-outcome step counters.

use serde::{Deserialize, Serialize};
use tracing::info;

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use logging::init_logging;
pub use metrics::{FlowMetrics, MetricsEventHandler, MetricsSnapshot};
pub use telemetry::TracingTelemetry;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Service name attached to log output
    pub service_name: String,
    /// Log level filter (e.g., "info,waypoint_core=debug")
    pub log_filter: String,
    /// Emit JSON lines instead of human readable output
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "waypoint".to_string(),
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Initialize monitoring system
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    init_logging(config)?;
    info!(service_name = %config.service_name, "Monitoring initialized");
    Ok(())
}
