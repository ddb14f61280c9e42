//!
//! Waypoint Core - durable step-replay engine
//!
//! This crate defines the domain model, the history repository interface
//! and the replay engine that lets a long-running flow resume from the
//! exact step where it last stopped without re-running completed work.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow contexts, step identity, failures and repositories
pub mod domain;

/// Application services - replay engine and flow runner
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;
pub use types::DataPacket;

pub use domain::events::{DomainEvent, DomainEventHandler, FlowEvent};
pub use domain::failure::StepFailure;
pub use domain::flow_context::{
    CorrelationId, FlowContext, FlowInstanceId, FlowParams, FlowState, ResultState,
    TaskExecutionResult, ValidationIssue,
};
pub use domain::repository::{FlowHistoryRepository, FlowSearchQuery, FlowStoreRecord};
pub use domain::step_id::{StepId, StepIdAllocator};
pub use domain::telemetry::{NoopTelemetry, TelemetrySink};

pub use application::flow_run_engine::{FlowModel, FlowRunEngine, StepContext};
pub use application::flow_runner::{Flow, FlowRunOutcome, FlowRunner, FlowStatus};
