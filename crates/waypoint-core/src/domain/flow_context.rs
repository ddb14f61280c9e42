use crate::{domain::step_id::StepId, DataPacket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a flow instance, stable for the flow's life
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowInstanceId(pub String);

impl FlowInstanceId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FlowInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External correlation identifier supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

/// Outcome of a step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultState {
    /// The step succeeded
    Success,
    /// The step failed
    Fail,
}

/// Control state produced by a step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// Only carried by the creation snapshot
    Start,
    /// The flow may proceed to the next step
    Continue,
    /// The flow must stop after this step
    Stop,
}

/// A business-rule validation failure reported by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field or rule the issue relates to
    pub key: String,
    /// Human readable description
    pub message: String,
}

impl ValidationIssue {
    /// Create a validation issue
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Outcome of one step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    /// Success or failure
    pub result_state: ResultState,
    /// Whether the flow may continue
    pub flow_state: FlowState,
    /// Failure message, present only on abnormal outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    /// Failure trace, present only on abnormal outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_stack_trace: Option<String>,
    /// The step suspended waiting for external input
    #[serde(default)]
    pub is_form_task: bool,
    /// Form the external input is collected with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Key the resuming callback must present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_task_id: Option<String>,
    /// Form payload handed to the external party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_state: Option<DataPacket>,
    /// Non-fatal validation failures
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
}

impl TaskExecutionResult {
    /// Default outcome: success, continue
    pub fn success() -> Self {
        Self::with_states(ResultState::Success, FlowState::Continue)
    }

    /// Outcome carried by the creation snapshot
    pub fn start() -> Self {
        Self::with_states(ResultState::Success, FlowState::Start)
    }

    fn with_states(result_state: ResultState, flow_state: FlowState) -> Self {
        Self {
            result_state,
            flow_state,
            exception_message: None,
            exception_stack_trace: None,
            is_form_task: false,
            form_id: None,
            callback_task_id: None,
            form_state: None,
            validation_issues: Vec::new(),
        }
    }

    /// Continuation is permitted only on success with a continue state
    pub fn can_continue(&self) -> bool {
        self.result_state == ResultState::Success && self.flow_state == FlowState::Continue
    }
}

impl Default for TaskExecutionResult {
    fn default() -> Self {
        Self::success()
    }
}

/// Immutable input configuration of a flow instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowParams {
    /// Caller supplied correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<CorrelationId>,
    /// Arbitrary named parameters, kept ordered for deterministic snapshots
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl FlowParams {
    /// Empty params
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the external correlation id
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(CorrelationId(external_id.into()));
        self
    }

    /// Add a named parameter
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Look up a named parameter
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// Run-time snapshot of one flow instance at one point in its history
///
/// Every field is an owned value, so `clone()` yields an independent deep
/// copy. A snapshot handed to a repository is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    /// Instance identifier
    pub ref_id: FlowInstanceId,
    /// Business data
    pub model: DataPacket,
    /// Input configuration
    pub params: FlowParams,
    /// Steps that completed and permitted continuation, in order
    pub call_stack: Vec<StepId>,
    /// Step this snapshot represents; absent on the creation snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<StepId>,
    /// Outcome of `current_task`
    pub execution_result: TaskExecutionResult,
    /// When the snapshot was taken
    pub recorded_at: DateTime<Utc>,
}

impl FlowContext {
    /// Creation snapshot of a new instance
    pub fn new(ref_id: FlowInstanceId, model: DataPacket, params: FlowParams) -> Self {
        Self {
            ref_id,
            model,
            params,
            call_stack: Vec::new(),
            current_task: None,
            execution_result: TaskExecutionResult::start(),
            recorded_at: Utc::now(),
        }
    }
}
