use crate::domain::failure::StepFailure;
use crate::domain::flow_context::{FlowState, ResultState, TaskExecutionResult, ValidationIssue};
use crate::domain::step_id::StepId;
use crate::domain::telemetry::TelemetrySink;
use crate::{CoreError, DataPacket};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Form metadata and validation issues attached by an action while it runs
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InFlightResult {
    /// The action suspended for external input
    pub is_form_task: bool,
    /// Form used to collect the input
    pub form_id: Option<String>,
    /// Key the resuming callback must present
    pub callback_task_id: Option<String>,
    /// Payload handed to the external party
    pub form_state: Option<DataPacket>,
    /// Non-fatal validation failures
    pub validation_issues: Vec<ValidationIssue>,
}

/// Handle shared between a running action and the executor
pub type SharedInFlight = Arc<Mutex<InFlightResult>>;

/// Runs step actions and maps their failures to a [`TaskExecutionResult`]
///
/// | failure | result | flow |
/// |---|---|---|
/// | none | Success | Continue |
/// | `StopRequested` | Success | Stop |
/// | `BusinessFailure` | Fail | Stop |
/// | `Aggregated` with causes | Fail | Continue |
/// | `Invocation(StopRequested)` | Success | Stop |
/// | `Invocation(other)` | propagated as [`CoreError::StepInvocationError`] | |
/// | `Unclassified` or panic | Fail | Continue |
pub struct StepExecutor {
    telemetry: Arc<dyn TelemetrySink>,
}

impl StepExecutor {
    /// Create an executor reporting to `telemetry`
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { telemetry }
    }

    /// Run `action` and classify its outcome.
    ///
    /// Whatever the outcome, form metadata and validation issues left in
    /// `in_flight` by the action are carried into the returned result.
    pub async fn execute<Fut>(
        &self,
        step_id: &StepId,
        in_flight: &SharedInFlight,
        action: Fut,
    ) -> Result<TaskExecutionResult, CoreError>
    where
        Fut: Future<Output = Result<(), StepFailure>>,
    {
        let outcome = match AssertUnwindSafe(action).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(StepFailure::unclassified(anyhow::anyhow!(
                "step panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let mut result = TaskExecutionResult::success();
        if let Err(failure) = outcome {
            self.classify(step_id, failure, &mut result)?;
        }

        reconcile(&mut result, in_flight);
        Ok(result)
    }

    fn classify(
        &self,
        step_id: &StepId,
        failure: StepFailure,
        result: &mut TaskExecutionResult,
    ) -> Result<(), CoreError> {
        match &failure {
            StepFailure::StopRequested(message) => {
                result.result_state = ResultState::Success;
                result.flow_state = FlowState::Stop;
                result.exception_message = Some(message.clone());
                result.exception_stack_trace = Some(failure.trace());
                self.telemetry.record_exception(step_id, &failure);
            }
            StepFailure::BusinessFailure(message) => {
                log_failure(step_id, &failure);
                result.result_state = ResultState::Fail;
                result.flow_state = FlowState::Stop;
                result.exception_message = Some(message.clone());
                result.exception_stack_trace = Some(failure.trace());
                self.telemetry.record_exception(step_id, &failure);
            }
            StepFailure::Aggregated { causes, .. } => {
                log_failure(step_id, &failure);
                // Flow state stays Continue here; the gate still halts on Fail
                if let Some(first) = causes.first() {
                    result.result_state = ResultState::Fail;
                    result.exception_message = Some(first.to_string());
                    result.exception_stack_trace = Some(failure.trace());
                    for cause in causes {
                        self.telemetry.record_exception(step_id, cause);
                    }
                }
            }
            StepFailure::Invocation(inner) => {
                log_failure(step_id, &failure);
                match inner.as_ref() {
                    StepFailure::StopRequested(message) => {
                        result.result_state = ResultState::Success;
                        result.flow_state = FlowState::Stop;
                        result.exception_message = Some(message.clone());
                        result.exception_stack_trace = Some(failure.trace());
                    }
                    other => {
                        return Err(CoreError::StepInvocationError(format!(
                            "{}: {}",
                            step_id, other
                        )));
                    }
                }
            }
            StepFailure::Unclassified(err) => {
                log_failure(step_id, &failure);
                result.result_state = ResultState::Fail;
                result.exception_message = Some(err.to_string());
                result.exception_stack_trace = Some(failure.trace());
                self.telemetry.record_exception(step_id, &failure);
            }
        }
        Ok(())
    }
}

fn reconcile(result: &mut TaskExecutionResult, in_flight: &SharedInFlight) {
    let in_flight = in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if in_flight.is_form_task {
        result.is_form_task = true;
        result.form_id = in_flight.form_id.clone();
        result.callback_task_id = in_flight.callback_task_id.clone();
        result.form_state = in_flight.form_state.clone();
    }
    result.validation_issues = in_flight.validation_issues.clone();
}

/// Log every leaf cause of `failure`
fn log_failure(step_id: &StepId, failure: &StepFailure) {
    let leaves = failure.leaves();
    if leaves.len() > 1 {
        warn!(
            step_id = %step_id,
            kind = failure.kind(),
            causes = leaves.len(),
            "Step raised {}", failure
        );
    }
    for leaf in leaves {
        error!(
            step_id = %step_id,
            kind = leaf.kind(),
            trace = %leaf.trace(),
            "Exception thrown: {}", leaf
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
