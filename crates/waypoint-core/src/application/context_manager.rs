use crate::domain::flow_context::FlowContext;
use crate::domain::repository::FlowHistoryRepository;
use crate::domain::step_id::StepId;
use crate::CoreError;
use chrono::Utc;
use std::sync::Arc;
use tracing::trace;

/// Owns the history of one flow instance during an attempt
///
/// Snapshots handed out or stored are always independent copies of the
/// live context.
pub struct ContextManager {
    repository: Arc<dyn FlowHistoryRepository>,
    history: Vec<FlowContext>,
}

impl ContextManager {
    /// Create a manager over an already loaded history
    pub fn new(repository: Arc<dyn FlowHistoryRepository>, history: Vec<FlowContext>) -> Self {
        Self {
            repository,
            history,
        }
    }

    /// History known to this attempt, oldest first
    pub fn history(&self) -> &[FlowContext] {
        &self.history
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<&FlowContext> {
        self.history.last()
    }

    /// Find the snapshot recorded for `step_id`.
    ///
    /// The first snapshot carrying the id is located; if it starts a
    /// contiguous run of snapshots for the same id, the last of the run is
    /// used. Duplicates separated by other steps are not considered.
    pub fn resolve_snapshot(&self, step_id: &StepId) -> Option<FlowContext> {
        let start = self
            .history
            .iter()
            .position(|snapshot| snapshot.current_task.as_ref() == Some(step_id))?;
        let run = self.history[start..]
            .iter()
            .take_while(|snapshot| snapshot.current_task.as_ref() == Some(step_id))
            .count();

        trace!(step_id = %step_id, position = start + run - 1, "Resolved snapshot");
        self.history.get(start + run - 1).cloned()
    }

    /// Persist a copy of `context` and append it to the in-memory history
    pub async fn record_snapshot(&mut self, context: &FlowContext) -> Result<(), CoreError> {
        let mut copy = context.clone();
        copy.recorded_at = Utc::now();

        self.repository.append_snapshot(&copy).await?;
        self.history.push(copy);
        Ok(())
    }
}
