//! Online-or-queue mutations.
//!
//! A mutation goes straight to the backend when the network monitor reports
//! connectivity. When offline, or when the call fails in a way that may clear
//! up later (transport failure, timeout, 5xx), it is stored in the
//! [`SyncQueue`] for the next drain. Rejections from the backend (4xx) are
//! returned to the caller.

use crate::error::{CoreError, Result};
use bridge_traits::network::NetworkMonitor;
use core_api::{ApiError, ResourceApi, ResourceKind};
use core_sync::{SyncQueue, SyncQueueItem, SyncType};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where a mutation ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// Applied by the backend; carries its response body
    Synced(Value),
    /// Stored for replay
    Queued(SyncQueueItem),
}

impl PersistOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, PersistOutcome::Queued(_))
    }
}

#[derive(Clone)]
pub struct PersistenceService {
    resources: ResourceApi,
    queue: Arc<SyncQueue>,
    network: Arc<dyn NetworkMonitor>,
}

impl PersistenceService {
    pub fn new(resources: ResourceApi, queue: Arc<SyncQueue>, network: Arc<dyn NetworkMonitor>) -> Self {
        Self {
            resources,
            queue,
            network,
        }
    }

    #[instrument(skip(self, data))]
    pub async fn create(&self, kind: ResourceKind, data: Value) -> Result<PersistOutcome> {
        if !self.network.is_connected().await {
            return self.enqueue(SyncType::Create, kind, data).await;
        }

        let result: core_api::Result<Value> = self.resources.create(kind, &data).await;
        self.settle(result, SyncType::Create, kind, data).await
    }

    /// `data` is queued with `id` merged in so the replay can address the
    /// same record.
    #[instrument(skip(self, data))]
    pub async fn update(&self, kind: ResourceKind, id: &str, data: Value) -> Result<PersistOutcome> {
        let data = with_id(data, id);
        if !self.network.is_connected().await {
            return self.enqueue(SyncType::Update, kind, data).await;
        }

        let result: core_api::Result<Value> = self.resources.update(kind, id, &data).await;
        self.settle(result, SyncType::Update, kind, data).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Result<PersistOutcome> {
        let data = with_id(Value::Object(Map::new()), id);
        if !self.network.is_connected().await {
            return self.enqueue(SyncType::Delete, kind, data).await;
        }

        let result = self
            .resources
            .delete(kind, id)
            .await
            .map(|()| Value::Null);
        self.settle(result, SyncType::Delete, kind, data).await
    }

    async fn settle(
        &self,
        result: std::result::Result<Value, ApiError>,
        sync_type: SyncType,
        kind: ResourceKind,
        data: Value,
    ) -> Result<PersistOutcome> {
        match result {
            Ok(body) => Ok(PersistOutcome::Synced(body)),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Backend unreachable, queueing mutation");
                self.enqueue(sync_type, kind, data).await
            }
            Err(e) => Err(CoreError::Api(e)),
        }
    }

    async fn enqueue(&self, sync_type: SyncType, kind: ResourceKind, data: Value) -> Result<PersistOutcome> {
        let item = self.queue.enqueue(sync_type, kind.path(), data).await?;
        info!(item_id = %item.id, endpoint = %item.endpoint, "Mutation queued for sync");
        Ok(PersistOutcome::Queued(item))
    }
}

/// The `id` argument wins over any `id` already in `data`, so a queued
/// replay targets the same record as the online call.
fn with_id(data: Value, id: &str) -> Value {
    match data {
        Value::Object(mut fields) => {
            fields.insert("id".to_string(), Value::String(id.to_string()));
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("id".to_string(), Value::String(id.to_string()));
            fields.insert("data".to_string(), other);
            Value::Object(fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_id_overrides_payload_id() {
        assert_eq!(with_id(json!({"id": "x", "a": 1}), "y"), json!({"id": "y", "a": 1}));
        assert_eq!(with_id(json!({"a": 1}), "y"), json!({"id": "y", "a": 1}));
        assert_eq!(with_id(json!(5), "y"), json!({"id": "y", "data": 5}));
    }
}
