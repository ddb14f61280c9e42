use crate::application::context_manager::ContextManager;
use crate::application::control::ControlResolver;
use crate::application::replay;
use crate::application::step_executor::{InFlightResult, SharedInFlight, StepExecutor};
use crate::domain::events::{DomainEvent, DomainEventHandler, FlowEvent};
use crate::domain::failure::StepFailure;
use crate::domain::flow_context::{FlowContext, FlowInstanceId, FlowParams, ValidationIssue};
use crate::domain::repository::FlowHistoryRepository;
use crate::domain::step_id::{StepId, StepIdAllocator};
use crate::domain::telemetry::TelemetrySink;
use crate::{CoreError, DataPacket};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Business model a flow works on
pub trait FlowModel: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> FlowModel for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Handle given to a step action while it runs
pub struct StepContext<M> {
    flow_instance_id: FlowInstanceId,
    step_id: StepId,
    model: Arc<Mutex<M>>,
    params: Arc<FlowParams>,
    in_flight: SharedInFlight,
    callback_payload: Option<Arc<DataPacket>>,
}

impl<M> Clone for StepContext<M> {
    fn clone(&self) -> Self {
        Self {
            flow_instance_id: self.flow_instance_id.clone(),
            step_id: self.step_id.clone(),
            model: self.model.clone(),
            params: self.params.clone(),
            in_flight: self.in_flight.clone(),
            callback_payload: self.callback_payload.clone(),
        }
    }
}

impl<M> StepContext<M> {
    /// Lock the live model for reading or mutation
    pub async fn model(&self) -> MutexGuard<'_, M> {
        self.model.lock().await
    }

    /// Immutable flow params
    pub fn params(&self) -> &FlowParams {
        &self.params
    }

    /// Identifier of the running step
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// Instance the step belongs to
    pub fn flow_instance_id(&self) -> &FlowInstanceId {
        &self.flow_instance_id
    }

    /// Payload delivered by a form callback, if this step resumes one
    pub fn callback_payload(&self) -> Option<&DataPacket> {
        self.callback_payload.as_deref()
    }

    /// Report a non-fatal validation failure
    pub fn add_validation_issue(&self, issue: ValidationIssue) {
        self.in_flight().validation_issues.push(issue);
    }

    /// Suspend the flow until a callback presents `callback_task_id`.
    ///
    /// Returns the stop failure the action should return.
    pub fn await_form(
        &self,
        form_id: impl Into<String>,
        callback_task_id: impl Into<String>,
        form_state: DataPacket,
    ) -> StepFailure {
        let form_id = form_id.into();
        {
            let mut pending = self.in_flight();
            pending.is_form_task = true;
            pending.form_id = Some(form_id.clone());
            pending.callback_task_id = Some(callback_task_id.into());
            pending.form_state = Some(form_state);
        }
        StepFailure::stop(format!("Waiting for form {}", form_id))
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, InFlightResult> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Replay engine for one attempt of one flow instance
///
/// Each call to [`step`](Self::step) either replays the step from history or
/// runs it live. Once a step denies continuation the snapshot is persisted
/// and [`CoreError::FlowHalted`] is returned; the caller must stop invoking
/// steps.
pub struct FlowRunEngine<M: FlowModel> {
    context: FlowContext,
    contexts: ContextManager,
    allocator: StepIdAllocator,
    executor: StepExecutor,
    model: Arc<Mutex<M>>,
    params: Arc<FlowParams>,
    event_handler: Option<Arc<dyn DomainEventHandler>>,
    callback_payload: Option<Arc<DataPacket>>,
    halted_at: Option<StepId>,
    fatal: Option<CoreError>,
}

impl<M: FlowModel> FlowRunEngine<M> {
    /// Build an engine from a loaded history (creation snapshot first)
    pub fn from_history(
        repository: Arc<dyn FlowHistoryRepository>,
        telemetry: Arc<dyn TelemetrySink>,
        history: Vec<FlowContext>,
    ) -> Result<Self, CoreError> {
        let context = history
            .last()
            .cloned()
            .ok_or_else(|| CoreError::StateStoreError("Flow history is empty".to_string()))?;
        let model: M = context.model.to()?;
        let params = Arc::new(context.params.clone());

        Ok(Self {
            context,
            contexts: ContextManager::new(repository, history),
            allocator: StepIdAllocator::new(),
            executor: StepExecutor::new(telemetry),
            model: Arc::new(Mutex::new(model)),
            params,
            event_handler: None,
            callback_payload: None,
            halted_at: None,
            fatal: None,
        })
    }

    /// Attach a domain event handler
    pub fn with_event_handler(mut self, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Hand `payload` to the first step that runs live in this attempt
    pub fn with_callback_payload(mut self, payload: DataPacket) -> Self {
        self.callback_payload = Some(Arc::new(payload));
        self
    }

    /// Invoke a named step
    pub async fn step<F, Fut>(&mut self, name: &str, action: F) -> Result<(), CoreError>
    where
        F: FnOnce(StepContext<M>) -> Fut + Send,
        Fut: Future<Output = Result<(), StepFailure>> + Send,
    {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if let Some(step_id) = &self.halted_at {
            return Err(ControlResolver::halt_signal(step_id));
        }

        let step_id = self.allocator.allocate(name);
        let outcome = self.run_step(step_id, action).await;
        if let Err(e) = &outcome {
            if !e.is_halt() {
                self.fatal = Some(e.clone());
            }
        }
        outcome
    }

    async fn run_step<F, Fut>(&mut self, step_id: StepId, action: F) -> Result<(), CoreError>
    where
        F: FnOnce(StepContext<M>) -> Fut + Send,
        Fut: Future<Output = Result<(), StepFailure>> + Send,
    {
        if let Some(snapshot) = self.contexts.resolve_snapshot(&step_id) {
            self.context = snapshot;
        }

        if replay::is_skip(&self.context.call_stack, self.allocator.in_progress()) {
            debug!(
                flow_instance_id = %self.context.ref_id,
                step_id = %step_id,
                "Replaying step from history"
            );
            let restored: M = self.context.model.to()?;
            *self.model.lock().await = restored;
            self.params = Arc::new(self.context.params.clone());

            self.emit(FlowEvent::StepReplayed {
                flow_instance_id: self.context.ref_id.clone(),
                step_id,
                timestamp: Utc::now(),
            })
            .await;
            return Ok(());
        }

        debug!(
            flow_instance_id = %self.context.ref_id,
            step_id = %step_id,
            "Executing step"
        );
        let in_flight = SharedInFlight::default();
        let step_context = StepContext {
            flow_instance_id: self.context.ref_id.clone(),
            step_id: step_id.clone(),
            model: self.model.clone(),
            params: self.params.clone(),
            in_flight: in_flight.clone(),
            callback_payload: self.callback_payload.take(),
        };

        let started = Instant::now();
        let result = self
            .executor
            .execute(&step_id, &in_flight, action(step_context))
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.context.model = DataPacket::from(&*self.model.lock().await)?;
        self.context.params = (*self.params).clone();
        let proceed = ControlResolver::apply(&mut self.context, &step_id, result.clone());
        self.contexts.record_snapshot(&self.context).await?;

        self.emit(FlowEvent::StepExecuted {
            flow_instance_id: self.context.ref_id.clone(),
            step_id: step_id.clone(),
            result: result.clone(),
            duration_ms,
            timestamp: Utc::now(),
        })
        .await;

        if proceed {
            return Ok(());
        }

        info!(
            flow_instance_id = %self.context.ref_id,
            step_id = %step_id,
            result_state = ?result.result_state,
            flow_state = ?result.flow_state,
            "Execution stopped"
        );
        self.emit(FlowEvent::FlowHalted {
            flow_instance_id: self.context.ref_id.clone(),
            step_id: step_id.clone(),
            result,
            timestamp: Utc::now(),
        })
        .await;
        let signal = ControlResolver::halt_signal(&step_id);
        self.halted_at = Some(step_id);
        Err(signal)
    }

    /// Instance this engine drives
    pub fn flow_instance_id(&self) -> &FlowInstanceId {
        &self.context.ref_id
    }

    /// Live context
    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    /// History known to this attempt, including snapshots recorded by it
    pub fn history(&self) -> &[FlowContext] {
        self.contexts.history()
    }

    /// Step identifiers allocated so far in this attempt
    pub fn in_progress(&self) -> &[StepId] {
        self.allocator.in_progress()
    }

    /// Step that halted the attempt, if any
    pub fn halted_at(&self) -> Option<&StepId> {
        self.halted_at.as_ref()
    }

    /// Error that ended the attempt, if a step failed outside the
    /// continuation gate. Every later `step` call returns it again.
    pub fn fatal_error(&self) -> Option<&CoreError> {
        self.fatal.as_ref()
    }

    /// Copy of the live model
    pub async fn model(&self) -> M {
        self.model.lock().await.clone()
    }

    async fn emit(&self, event: FlowEvent) {
        if let Some(handler) = &self.event_handler {
            if let Err(e) = handler.handle_event(&event).await {
                warn!(
                    flow_instance_id = %event.flow_instance_id(),
                    event_type = event.event_type(),
                    error = %e,
                    "Domain event handler failed"
                );
            }
        }
    }
}
