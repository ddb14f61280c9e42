use crate::application::flow_run_engine::{FlowModel, FlowRunEngine};
use crate::domain::events::DomainEventHandler;
use crate::domain::flow_context::{
    CorrelationId, FlowContext, FlowInstanceId, FlowParams, ResultState, TaskExecutionResult,
};
use crate::domain::repository::{FlowHistoryRepository, FlowSearchQuery};
use crate::domain::telemetry::TelemetrySink;
use crate::{CoreError, DataPacket};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// A flow body: an ordered sequence of engine steps
#[async_trait]
pub trait Flow: Send + Sync {
    /// Business model the steps work on
    type Model: FlowModel;

    /// Name stored with every instance of this flow
    fn flow_type_name(&self) -> &str;

    /// Invoke the steps. Must return as soon as a step reports the halt signal.
    async fn execute(&self, engine: &mut FlowRunEngine<Self::Model>) -> Result<(), CoreError>;
}

/// Where a flow instance stands after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    /// The flow body returned without a halt
    Completed,
    /// A step requested a stop
    Stopped,
    /// A step is waiting for a form callback
    WaitingForInput,
    /// A step failed
    Failed,
}

impl FlowStatus {
    /// Status implied by the outcome that halted a flow
    pub fn from_halt(result: &TaskExecutionResult) -> Self {
        if result.is_form_task {
            FlowStatus::WaitingForInput
        } else if result.result_state == ResultState::Fail {
            FlowStatus::Failed
        } else {
            FlowStatus::Stopped
        }
    }
}

/// Result of one attempt
#[derive(Debug, Clone)]
pub struct FlowRunOutcome<M> {
    /// Instance that ran
    pub instance_id: FlowInstanceId,
    /// Where the instance stands
    pub status: FlowStatus,
    /// Outcome of the last step that ran or was replayed
    pub last_result: TaskExecutionResult,
    /// Live model at the end of the attempt
    pub model: M,
}

/// Starts and resumes flows over a history repository
pub struct FlowRunner {
    repository: Arc<dyn FlowHistoryRepository>,
    telemetry: Arc<dyn TelemetrySink>,
    event_handler: Option<Arc<dyn DomainEventHandler>>,
}

impl FlowRunner {
    /// Create a new runner
    pub fn new(
        repository: Arc<dyn FlowHistoryRepository>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            repository,
            telemetry,
            event_handler: None,
        }
    }

    /// Attach a domain event handler passed to every engine
    pub fn with_event_handler(mut self, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Create a new instance of `flow` and run it
    #[instrument(skip_all, fields(flow_type = flow.flow_type_name()))]
    pub async fn start_flow<F: Flow>(
        &self,
        flow: &F,
        model: &F::Model,
        params: FlowParams,
    ) -> Result<FlowRunOutcome<F::Model>, CoreError> {
        let initial = self
            .repository
            .create_instance(flow.flow_type_name(), DataPacket::from(model)?, params)
            .await?;
        info!(flow_instance_id = %initial.ref_id, "Starting flow");

        self.run(flow, vec![initial], None).await
    }

    /// Resume an instance from its stored history
    #[instrument(skip_all, fields(flow_type = flow.flow_type_name(), flow_instance_id = %id))]
    pub async fn resume_flow<F: Flow>(
        &self,
        flow: &F,
        id: &FlowInstanceId,
    ) -> Result<FlowRunOutcome<F::Model>, CoreError> {
        let history = self.repository.read_history(id).await?;
        info!(snapshots = history.len(), "Resuming flow");

        self.run(flow, history, None).await
    }

    /// Resume the instance created with `external_id`
    #[instrument(skip_all, fields(flow_type = flow.flow_type_name(), external_id = %external_id.0))]
    pub async fn resume_by_correlation<F: Flow>(
        &self,
        flow: &F,
        external_id: &CorrelationId,
    ) -> Result<FlowRunOutcome<F::Model>, CoreError> {
        let history = self
            .repository
            .find_by_correlation(external_id)
            .await?
            .ok_or_else(|| CoreError::FlowInstanceNotFound(external_id.0.clone()))?;
        info!(snapshots = history.len(), "Resuming flow by correlation id");

        self.run(flow, history, None).await
    }

    /// Resume an instance waiting on a form, delivering the callback payload
    #[instrument(skip_all, fields(flow_type = flow.flow_type_name(), flow_instance_id = %id))]
    pub async fn resume_with_callback<F: Flow>(
        &self,
        flow: &F,
        id: &FlowInstanceId,
        callback_task_id: &str,
        payload: DataPacket,
    ) -> Result<FlowRunOutcome<F::Model>, CoreError> {
        let history = self.repository.read_history(id).await?;
        let pending = history
            .last()
            .map(|ctx| &ctx.execution_result)
            .filter(|result| result.is_form_task);

        match pending.and_then(|result| result.callback_task_id.as_deref()) {
            Some(expected) if expected == callback_task_id => {}
            Some(expected) => {
                return Err(CoreError::CallbackMismatch(format!(
                    "instance {} waits for {}, got {}",
                    id, expected, callback_task_id
                )))
            }
            None => {
                return Err(CoreError::CallbackMismatch(format!(
                    "instance {} is not waiting for a form",
                    id
                )))
            }
        }
        info!(callback_task_id, "Resuming flow from form callback");

        self.run(flow, history, Some(payload)).await
    }

    /// Look up a stored history
    pub async fn find_history(
        &self,
        query: &FlowSearchQuery,
    ) -> Result<Option<Vec<FlowContext>>, CoreError> {
        self.repository.find_history(query).await
    }

    async fn run<F: Flow>(
        &self,
        flow: &F,
        history: Vec<FlowContext>,
        callback_payload: Option<DataPacket>,
    ) -> Result<FlowRunOutcome<F::Model>, CoreError> {
        let mut engine = FlowRunEngine::<F::Model>::from_history(
            self.repository.clone(),
            self.telemetry.clone(),
            history,
        )?;
        if let Some(handler) = &self.event_handler {
            engine = engine.with_event_handler(handler.clone());
        }
        if let Some(payload) = callback_payload {
            engine = engine.with_callback_payload(payload);
        }

        let outcome = flow.execute(&mut engine).await;
        if let Some(err) = engine.fatal_error() {
            return Err(err.clone());
        }
        let status = match outcome {
            Ok(()) if engine.halted_at().is_none() => FlowStatus::Completed,
            Ok(()) => FlowStatus::from_halt(&engine.context().execution_result),
            Err(e) if e.is_halt() => FlowStatus::from_halt(&engine.context().execution_result),
            Err(e) => return Err(e),
        };
        info!(
            flow_instance_id = %engine.flow_instance_id(),
            status = ?status,
            steps = engine.in_progress().len(),
            "Flow attempt finished"
        );

        Ok(FlowRunOutcome {
            instance_id: engine.flow_instance_id().clone(),
            status,
            last_result: engine.context().execution_result.clone(),
            model: engine.model().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::StepFailure;
    use crate::domain::flow_context::FlowState;
    use crate::domain::repository::memory::MemoryFlowHistoryRepository;
    use crate::domain::telemetry::NoopTelemetry;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Ticket {
        opened: bool,
        answer: Option<String>,
    }

    struct SupportFlow;

    #[async_trait]
    impl Flow for SupportFlow {
        type Model = Ticket;

        fn flow_type_name(&self) -> &str {
            "SupportFlow"
        }

        async fn execute(&self, engine: &mut FlowRunEngine<Ticket>) -> Result<(), CoreError> {
            engine
                .step("Open", |ctx| async move {
                    ctx.model().await.opened = true;
                    Ok(())
                })
                .await?;
            engine
                .step("Answer", |ctx| async move {
                    let Some(payload) = ctx.callback_payload() else {
                        return Err(ctx.await_form("answer-form", "cb-answer", DataPacket::null()));
                    };
                    let answer: Option<String> = payload.to()?;
                    ctx.model().await.answer = answer;
                    Ok::<(), StepFailure>(())
                })
                .await?;
            Ok(())
        }
    }

    fn runner() -> FlowRunner {
        FlowRunner::new(
            Arc::new(MemoryFlowHistoryRepository::new()),
            Arc::new(NoopTelemetry),
        )
    }

    #[test]
    fn test_status_from_halt() {
        let mut result = TaskExecutionResult::success();
        result.flow_state = FlowState::Stop;
        assert_eq!(FlowStatus::from_halt(&result), FlowStatus::Stopped);

        result.result_state = ResultState::Fail;
        assert_eq!(FlowStatus::from_halt(&result), FlowStatus::Failed);

        result.is_form_task = true;
        assert_eq!(FlowStatus::from_halt(&result), FlowStatus::WaitingForInput);
    }

    #[tokio::test]
    async fn test_form_wait_then_callback() {
        let runner = runner();
        let first = runner
            .start_flow(&SupportFlow, &Ticket::default(), FlowParams::new())
            .await
            .unwrap();

        assert_eq!(first.status, FlowStatus::WaitingForInput);
        assert_eq!(first.last_result.callback_task_id.as_deref(), Some("cb-answer"));
        assert!(first.model.opened);

        let second = runner
            .resume_with_callback(
                &SupportFlow,
                &first.instance_id,
                "cb-answer",
                DataPacket::new(serde_json::json!("restart the router")),
            )
            .await
            .unwrap();

        assert_eq!(second.status, FlowStatus::Completed);
        assert_eq!(second.model.answer.as_deref(), Some("restart the router"));
    }

    #[tokio::test]
    async fn test_callback_mismatch() {
        let runner = runner();
        let first = runner
            .start_flow(&SupportFlow, &Ticket::default(), FlowParams::new())
            .await
            .unwrap();

        let err = runner
            .resume_with_callback(&SupportFlow, &first.instance_id, "cb-other", DataPacket::null())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CallbackMismatch(_)));
    }

    struct SwallowingFlow;

    #[async_trait]
    impl Flow for SwallowingFlow {
        type Model = Ticket;

        fn flow_type_name(&self) -> &str {
            "SwallowingFlow"
        }

        async fn execute(&self, engine: &mut FlowRunEngine<Ticket>) -> Result<(), CoreError> {
            let _ = engine
                .step("Lookup", |_| async {
                    Err(StepFailure::invocation(StepFailure::business("no such queue")))
                })
                .await;
            let _ = engine
                .step("Open", |ctx| async move {
                    ctx.model().await.opened = true;
                    Ok(())
                })
                .await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_invocation_error_reported_even_if_swallowed() {
        let err = runner()
            .start_flow(&SwallowingFlow, &Ticket::default(), FlowParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StepInvocationError(_)));
    }

    #[tokio::test]
    async fn test_resume_unknown_correlation() {
        let err = runner()
            .resume_by_correlation(&SupportFlow, &CorrelationId("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::FlowInstanceNotFound("missing".to_string()));
    }
}
