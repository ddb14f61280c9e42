/// Snapshot resolution and recording
pub mod context_manager;

/// Continuation gate and halt signal
pub mod control;

/// Per-instance replay engine
pub mod flow_run_engine;

/// Start/resume driver over a history repository
pub mod flow_runner;

/// Skip-or-execute decision
pub mod replay;

/// Step action execution and outcome classification
pub mod step_executor;
