/// Domain events emitted by the replay engine
pub mod events;

/// Failures raised by step actions
pub mod failure;

/// Flow context snapshots and step outcomes
pub mod flow_context;

/// History repository interface
pub mod repository;

/// Step identifiers
pub mod step_id;

/// Telemetry sink interface
pub mod telemetry;
