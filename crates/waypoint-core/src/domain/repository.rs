//! Repository traits for the Waypoint engine
//!
//! The engine only needs an ordered, append-biased history per flow
//! instance. External crates implement [`FlowHistoryRepository`] to provide
//! different persistence mechanisms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::flow_context::{CorrelationId, FlowContext, FlowInstanceId, FlowParams};
use crate::{CoreError, DataPacket};

/// Everything stored for one flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStoreRecord {
    /// Instance identifier
    pub instance_id: FlowInstanceId,
    /// Correlation id taken from the creation params
    pub external_id: Option<CorrelationId>,
    /// Name of the flow type that created the instance
    pub flow_type_name: String,
    /// Snapshots in chronological order, creation snapshot first
    pub history: Vec<FlowContext>,
}

/// Lookup key for a flow history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSearchQuery {
    /// By instance identifier
    RefId(FlowInstanceId),
    /// By caller supplied correlation id
    ExternalId(CorrelationId),
}

/// Durable store of flow histories
#[async_trait]
pub trait FlowHistoryRepository: Send + Sync {
    /// Allocate a new instance and persist its creation snapshot
    async fn create_instance(
        &self,
        flow_type_name: &str,
        model: DataPacket,
        params: FlowParams,
    ) -> Result<FlowContext, CoreError>;

    /// Append a snapshot to the history of `snapshot.ref_id`
    async fn append_snapshot(&self, snapshot: &FlowContext) -> Result<(), CoreError>;

    /// Read the full history of an instance
    async fn read_history(&self, id: &FlowInstanceId) -> Result<Vec<FlowContext>, CoreError>;

    /// Find a history by the correlation id given at creation
    async fn find_by_correlation(
        &self,
        external_id: &CorrelationId,
    ) -> Result<Option<Vec<FlowContext>>, CoreError>;

    /// Read the stored record of an instance, history included
    async fn read_instance_metadata(
        &self,
        id: &FlowInstanceId,
    ) -> Result<FlowStoreRecord, CoreError>;

    /// Supersede the whole history of an existing instance
    async fn replace_history(
        &self,
        id: &FlowInstanceId,
        history: Vec<FlowContext>,
    ) -> Result<(), CoreError>;

    /// Find a history by instance id or correlation id
    async fn find_history(
        &self,
        query: &FlowSearchQuery,
    ) -> Result<Option<Vec<FlowContext>>, CoreError> {
        match query {
            FlowSearchQuery::RefId(id) => match self.read_history(id).await {
                Ok(history) => Ok(Some(history)),
                Err(CoreError::FlowInstanceNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            FlowSearchQuery::ExternalId(external_id) => {
                self.find_by_correlation(external_id).await
            }
        }
    }
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory history repository backed by concurrent maps
    pub struct MemoryFlowHistoryRepository {
        records: Arc<DashMap<String, FlowStoreRecord>>,
        correlations: Arc<DashMap<String, String>>,
    }

    impl MemoryFlowHistoryRepository {
        /// Create a new memory history repository
        pub fn new() -> Self {
            Self {
                records: Arc::new(DashMap::with_capacity(64)),
                correlations: Arc::new(DashMap::with_capacity(32)),
            }
        }

        /// Number of stored instances
        pub fn len(&self) -> usize {
            self.records.len()
        }

        /// Whether the repository holds no instances
        pub fn is_empty(&self) -> bool {
            self.records.is_empty()
        }
    }

    impl Default for MemoryFlowHistoryRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FlowHistoryRepository for MemoryFlowHistoryRepository {
        async fn create_instance(
            &self,
            flow_type_name: &str,
            model: DataPacket,
            params: FlowParams,
        ) -> Result<FlowContext, CoreError> {
            let context = FlowContext::new(FlowInstanceId::generate(), model, params);
            let external_id = context.params.external_id.clone();

            if let Some(external_id) = &external_id {
                // First instance created for a correlation id keeps it
                self.correlations
                    .entry(external_id.0.clone())
                    .or_insert_with(|| context.ref_id.0.clone());
            }

            self.records.insert(
                context.ref_id.0.clone(),
                FlowStoreRecord {
                    instance_id: context.ref_id.clone(),
                    external_id,
                    flow_type_name: flow_type_name.to_string(),
                    history: vec![context.clone()],
                },
            );

            Ok(context)
        }

        async fn append_snapshot(&self, snapshot: &FlowContext) -> Result<(), CoreError> {
            let mut record = self
                .records
                .get_mut(&snapshot.ref_id.0)
                .ok_or_else(|| CoreError::FlowInstanceNotFound(snapshot.ref_id.0.clone()))?;
            record.history.push(snapshot.clone());
            Ok(())
        }

        async fn read_history(&self, id: &FlowInstanceId) -> Result<Vec<FlowContext>, CoreError> {
            self.records
                .get(&id.0)
                .map(|record| record.history.clone())
                .ok_or_else(|| CoreError::FlowInstanceNotFound(id.0.clone()))
        }

        async fn find_by_correlation(
            &self,
            external_id: &CorrelationId,
        ) -> Result<Option<Vec<FlowContext>>, CoreError> {
            let instance_id = match self.correlations.get(&external_id.0) {
                Some(id) => id.clone(),
                None => return Ok(None),
            };
            Ok(self
                .records
                .get(&instance_id)
                .map(|record| record.history.clone()))
        }

        async fn read_instance_metadata(
            &self,
            id: &FlowInstanceId,
        ) -> Result<FlowStoreRecord, CoreError> {
            self.records
                .get(&id.0)
                .map(|record| record.clone())
                .ok_or_else(|| CoreError::FlowInstanceNotFound(id.0.clone()))
        }

        async fn replace_history(
            &self,
            id: &FlowInstanceId,
            history: Vec<FlowContext>,
        ) -> Result<(), CoreError> {
            if let Some(stray) = history.iter().find(|ctx| &ctx.ref_id != id) {
                return Err(CoreError::StateStoreError(format!(
                    "Snapshot of instance {} cannot be stored under {}",
                    stray.ref_id, id
                )));
            }
            let mut record = self
                .records
                .get_mut(&id.0)
                .ok_or_else(|| CoreError::FlowInstanceNotFound(id.0.clone()))?;
            record.history = history;
            Ok(())
        }
    }

}
