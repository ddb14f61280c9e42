use crate::domain::flow_context::{FlowContext, TaskExecutionResult};
use crate::domain::step_id::StepId;
use crate::CoreError;

/// Decides whether a flow proceeds after a step
pub struct ControlResolver;

impl ControlResolver {
    /// Continuation is permitted only on Success with a Continue state
    pub fn can_continue(result: &TaskExecutionResult) -> bool {
        result.can_continue()
    }

    /// Fold a step outcome into the live context.
    ///
    /// The step joins the durable call stack only when continuation is
    /// permitted. Returns whether the flow may continue.
    pub fn apply(context: &mut FlowContext, step_id: &StepId, result: TaskExecutionResult) -> bool {
        let proceed = Self::can_continue(&result);
        if proceed {
            context.call_stack.push(step_id.clone());
        }
        context.current_task = Some(step_id.clone());
        context.execution_result = result;
        proceed
    }

    /// Signal raised to the caller once the halting snapshot is persisted
    pub fn halt_signal(step_id: &StepId) -> CoreError {
        CoreError::FlowHalted(step_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_context::{FlowInstanceId, FlowParams, FlowState, ResultState};
    use crate::DataPacket;

    fn context() -> FlowContext {
        FlowContext::new(
            FlowInstanceId("i-1".to_string()),
            DataPacket::null(),
            FlowParams::new(),
        )
    }

    #[test]
    fn test_apply_success_extends_call_stack() {
        let mut ctx = context();
        let step = StepId::new("A", 1);

        assert!(ControlResolver::apply(&mut ctx, &step, TaskExecutionResult::success()));
        assert_eq!(ctx.call_stack, vec![step.clone()]);
        assert_eq!(ctx.current_task, Some(step));
    }

    #[test]
    fn test_apply_failure_keeps_call_stack() {
        let mut ctx = context();
        let step = StepId::new("B", 2);
        let mut result = TaskExecutionResult::success();
        result.result_state = ResultState::Fail;
        result.flow_state = FlowState::Stop;

        assert!(!ControlResolver::apply(&mut ctx, &step, result.clone()));
        assert!(ctx.call_stack.is_empty());
        assert_eq!(ctx.current_task, Some(step));
        assert_eq!(ctx.execution_result, result);
    }

    #[test]
    fn test_halt_signal() {
        let signal = ControlResolver::halt_signal(&StepId::new("B", 2));
        assert!(signal.is_halt());
        assert_eq!(signal.to_string(), "Flow halted at step B:2");
    }
}
