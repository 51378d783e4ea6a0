//! # Offline Sync Queue
//!
//! Persisted FIFO of mutations made while the backend was unreachable.
//!
//! ## Lifecycle
//!
//! - [`SyncQueue::load`] restores the queue from the key-value store
//! - [`SyncQueue::enqueue`] appends and persists immediately
//! - [`SyncQueue::process_queue`] replays items in order when the host
//!   decides connectivity is back
//! - [`SyncQueue::shutdown`] writes the final state
//!
//! ## Drain
//!
//! ```text
//! snapshot ──> for each item (FIFO) ──ok──> remove
//!                      │ err
//!                      v
//!              retry_count += 1 ──>= max──> drop, warn, ItemDropped
//!                      │ < max
//!                      v
//!                 keep in place
//! ──> merge with items enqueued meanwhile ──> persist ──> stamp @last_sync
//! ```
//!
//! Only one drain runs at a time; overlapping calls return `None`.
//! Enqueueing is allowed during a drain.

use crate::error::{Result, SyncError};
use crate::mutation::MutationApi;
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use core_api::ResourceKind;
use core_runtime::config::ApiConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Storage key of the persisted queue.
pub const QUEUE_KEY: &str = "@sync_queue";
/// Storage key of the last completed drain (epoch milliseconds).
pub const LAST_SYNC_KEY: &str = "@last_sync";

/// Failed replays after which an item is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Type-safe queue item identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncItemId(String);

impl SyncItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Create,
    Update,
    Delete,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Create => "create",
            SyncType::Update => "update",
            SyncType::Delete => "delete",
        }
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: SyncItemId,
    #[serde(rename = "type")]
    pub sync_type: SyncType,
    pub endpoint: String,
    pub data: Value,
    /// Enqueue time, epoch milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub retry_count: u32,
}

impl SyncQueueItem {
    /// Target id for update and delete, read from `data.id`.
    fn target_id(&self) -> Option<String> {
        match self.data.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items replayed successfully
    pub processed: usize,
    /// Items that failed and stay queued
    pub failed: usize,
    /// Items removed after their last allowed failure
    pub dropped: usize,
    /// Queue length after the drain
    pub remaining: usize,
}

/// Clears the processing flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    max_retries: u32,
    items: Mutex<Vec<SyncQueueItem>>,
    is_processing: AtomicBool,
}

impl SyncQueue {
    /// Restores the queue persisted under [`QUEUE_KEY`]. An undecodable
    /// queue is logged and replaced by an empty one.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        max_retries: u32,
    ) -> Result<Self> {
        let items = match store.get(QUEUE_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<SyncQueueItem>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable sync queue");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        if !items.is_empty() {
            info!(pending = items.len(), "Restored sync queue");
        }

        Ok(Self {
            store,
            clock,
            event_bus,
            max_retries,
            items: Mutex::new(items),
            is_processing: AtomicBool::new(false),
        })
    }

    pub async fn from_config(
        config: &ApiConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Result<Self> {
        Self::load(store, clock, event_bus, config.sync_max_retries).await
    }

    /// Appends a mutation and persists the queue before returning.
    #[instrument(skip(self, data))]
    pub async fn enqueue(
        &self,
        sync_type: SyncType,
        endpoint: &str,
        data: Value,
    ) -> Result<SyncQueueItem> {
        let item = SyncQueueItem {
            id: SyncItemId::new(),
            sync_type,
            endpoint: endpoint.to_string(),
            data,
            timestamp: self.clock.unix_timestamp_millis(),
            retry_count: 0,
        };

        let mut items = self.items.lock().await;
        items.push(item.clone());
        if let Err(e) = self.persist(&items).await {
            items.pop();
            return Err(e);
        }

        debug!(item_id = %item.id, pending = items.len(), "Mutation queued");
        Ok(item)
    }

    /// Replays queued mutations in FIFO order.
    ///
    /// Returns `None` without doing anything when another drain is running.
    /// Per-item failures are absorbed into the report; only storage
    /// failures surface as errors.
    #[instrument(skip(self, api))]
    pub async fn process_queue(&self, api: &dyn MutationApi) -> Result<Option<SyncReport>> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress");
            return Ok(None);
        }
        let _guard = DrainGuard(&self.is_processing);

        let snapshot = self.items.lock().await.clone();
        let _ = self.event_bus.emit(CoreEvent::Sync(SyncEvent::Started {
            pending: snapshot.len(),
        }));

        let mut report = SyncReport::default();
        let mut finished: HashSet<SyncItemId> = HashSet::new();
        let mut retried: HashMap<SyncItemId, u32> = HashMap::new();

        for item in &snapshot {
            match self.dispatch(api, item).await {
                Ok(()) => {
                    report.processed += 1;
                    finished.insert(item.id.clone());
                }
                Err(e) => {
                    let retry_count = item.retry_count + 1;
                    if retry_count >= self.max_retries {
                        warn!(
                            item_id = %item.id,
                            endpoint = %item.endpoint,
                            retry_count,
                            error = %e,
                            "Dropping queued mutation after repeated failures"
                        );
                        let _ = self.event_bus.emit(CoreEvent::Sync(SyncEvent::ItemDropped {
                            item_id: item.id.to_string(),
                            endpoint: item.endpoint.clone(),
                            retry_count,
                        }));
                        report.dropped += 1;
                        finished.insert(item.id.clone());
                    } else {
                        debug!(item_id = %item.id, retry_count, error = %e, "Queued mutation failed");
                        report.failed += 1;
                        retried.insert(item.id.clone(), retry_count);
                    }
                }
            }
        }

        {
            // Memory only follows storage once the trimmed queue is written
            let mut items = self.items.lock().await;
            let mut trimmed: Vec<SyncQueueItem> = items
                .iter()
                .filter(|item| !finished.contains(&item.id))
                .cloned()
                .collect();
            for item in trimmed.iter_mut() {
                if let Some(retry_count) = retried.get(&item.id) {
                    item.retry_count = *retry_count;
                }
            }
            self.persist(&trimmed).await?;
            report.remaining = trimmed.len();
            *items = trimmed;
        }

        let now = self.clock.unix_timestamp_millis();
        self.store.set(LAST_SYNC_KEY, &now.to_string()).await?;

        let _ = self.event_bus.emit(CoreEvent::Sync(SyncEvent::Completed {
            processed: report.processed,
            failed: report.failed,
            dropped: report.dropped,
            remaining: report.remaining,
        }));
        info!(
            processed = report.processed,
            failed = report.failed,
            dropped = report.dropped,
            remaining = report.remaining,
            "Sync queue drained"
        );

        Ok(Some(report))
    }

    async fn dispatch(&self, api: &dyn MutationApi, item: &SyncQueueItem) -> Result<()> {
        let resource = ResourceKind::from_endpoint(&item.endpoint).ok_or_else(|| {
            SyncError::UnknownResource {
                endpoint: item.endpoint.clone(),
            }
        })?;

        match item.sync_type {
            SyncType::Create => api.create(resource, &item.data).await?,
            SyncType::Update => {
                let id = self.require_id(item)?;
                api.update(resource, &id, &item.data).await?
            }
            SyncType::Delete => {
                let id = self.require_id(item)?;
                api.delete(resource, &id).await?
            }
        }
        Ok(())
    }

    fn require_id(&self, item: &SyncQueueItem) -> Result<String> {
        item.target_id().ok_or_else(|| SyncError::MissingId {
            operation: item.sync_type.as_str().to_string(),
            endpoint: item.endpoint.clone(),
        })
    }

    async fn persist(&self, items: &[SyncQueueItem]) -> Result<()> {
        let raw = serde_json::to_string(items)?;
        self.store.set(QUEUE_KEY, &raw).await?;
        Ok(())
    }

    /// Copy of the queued items in replay order.
    pub async fn pending(&self) -> Vec<SyncQueueItem> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }

    /// Time of the last completed drain, epoch milliseconds.
    pub async fn last_sync(&self) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(LAST_SYNC_KEY)
            .await?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    /// Drops every queued mutation.
    pub async fn clear(&self) -> Result<()> {
        let mut items = self.items.lock().await;
        items.clear();
        self.store.remove(QUEUE_KEY).await?;
        Ok(())
    }

    /// Writes the current queue one last time.
    pub async fn shutdown(&self) -> Result<()> {
        let items = self.items.lock().await;
        self.persist(&items).await?;
        info!(pending = items.len(), "Sync queue shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::time::ManualClock;
    use chrono::Utc;
    use core_api::{ApiError, ErrorKind};
    use mockall::predicate::{always, eq, function};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryStore {
        values: std::sync::Mutex<BTreeMap<String, String>>,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for MemoryStore {
        async fn get(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> BridgeResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BridgeError::Storage("disk full".into()));
            }
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn remove(&self, key: &str) -> BridgeResult<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.values.lock().unwrap().keys().cloned().collect())
        }
    }

    mockall::mock! {
        pub Api {}

        #[async_trait]
        impl MutationApi for Api {
            async fn create(&self, resource: ResourceKind, data: &Value) -> core_api::Result<()>;
            async fn update(&self, resource: ResourceKind, id: &str, data: &Value) -> core_api::Result<()>;
            async fn delete(&self, resource: ResourceKind, id: &str) -> core_api::Result<()>;
        }
    }

    /// Records every create in order; fails payloads marked `"fail": true`.
    #[derive(Default)]
    struct RecordingApi {
        seen: std::sync::Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl MutationApi for RecordingApi {
        async fn create(&self, _resource: ResourceKind, data: &Value) -> core_api::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.seen
                .lock()
                .unwrap()
                .push(data["name"].as_str().unwrap_or_default().to_string());
            if data["fail"] == true {
                return Err(ApiError::from_status(500, "boom", "/mood/entries"));
            }
            Ok(())
        }

        async fn update(&self, _: ResourceKind, _: &str, _: &Value) -> core_api::Result<()> {
            Ok(())
        }

        async fn delete(&self, _: ResourceKind, _: &str) -> core_api::Result<()> {
            Ok(())
        }
    }

    async fn queue_with(store: Arc<MemoryStore>) -> (SyncQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = SyncQueue::load(store, clock.clone(), EventBus::default(), DEFAULT_MAX_RETRIES)
            .await
            .unwrap();
        (queue, clock)
    }

    #[tokio::test]
    async fn test_enqueue_writes_through() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store.clone()).await;

        let item = queue
            .enqueue(SyncType::Create, "/mood/entries", json!({"mood": "calm"}))
            .await
            .unwrap();

        assert_eq!(item.retry_count, 0);
        let raw = store.get(QUEUE_KEY).await.unwrap().unwrap();
        let persisted: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0]["type"], "create");
        assert_eq!(persisted[0]["endpoint"], "/mood/entries");
        assert_eq!(persisted[0]["retryCount"], 0);

        let (reloaded, _clock) = queue_with(store).await;
        assert_eq!(reloaded.pending().await, vec![item]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_queue_unchanged() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store.clone()).await;
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = queue
            .enqueue(SyncType::Create, "/mood/entries", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Storage(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_fifo_and_drop_policy() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store.clone()).await;
        let api = RecordingApi::default();

        for (name, fail) in [("A", false), ("B", true), ("C", false)] {
            queue
                .enqueue(SyncType::Create, "/mood/entries", json!({"name": name, "fail": fail}))
                .await
                .unwrap();
        }

        let first = queue.process_queue(&api).await.unwrap().unwrap();
        assert_eq!(
            first,
            SyncReport { processed: 2, failed: 1, dropped: 0, remaining: 1 }
        );
        assert_eq!(*api.seen.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(queue.pending().await[0].retry_count, 1);

        let second = queue.process_queue(&api).await.unwrap().unwrap();
        assert_eq!(second.failed, 1);
        assert_eq!(queue.pending().await[0].retry_count, 2);

        let third = queue.process_queue(&api).await.unwrap().unwrap();
        assert_eq!(
            third,
            SyncReport { processed: 0, failed: 0, dropped: 1, remaining: 0 }
        );

        assert_eq!(store.get(QUEUE_KEY).await.unwrap().as_deref(), Some("[]"));
    }

    /// Succeeds every replay, then makes the store reject writes.
    struct DiskFullAfterReplay(Arc<MemoryStore>);

    #[async_trait]
    impl MutationApi for DiskFullAfterReplay {
        async fn create(&self, _: ResourceKind, _: &Value) -> core_api::Result<()> {
            self.0.fail_writes.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn update(&self, _: ResourceKind, _: &str, _: &Value) -> core_api::Result<()> {
            Ok(())
        }

        async fn delete(&self, _: ResourceKind, _: &str) -> core_api::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_sweep_write_keeps_memory_and_storage_aligned() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store.clone()).await;
        let item = queue
            .enqueue(SyncType::Create, "/mood/entries", json!({"name": "A"}))
            .await
            .unwrap();

        let err = queue
            .process_queue(&DiskFullAfterReplay(store.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Storage(_)));
        assert!(!queue.is_processing());
        assert_eq!(queue.pending().await, vec![item.clone()]);

        let raw = store.get(QUEUE_KEY).await.unwrap().unwrap();
        let persisted: Vec<SyncQueueItem> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, vec![item]);
        assert_eq!(queue.last_sync().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_emits_event() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let event_bus = EventBus::new(16);
        let mut events = event_bus.subscribe();
        let queue = SyncQueue::load(store, clock, event_bus, 1).await.unwrap();

        let item = queue
            .enqueue(SyncType::Create, "/unknown/things", json!({}))
            .await
            .unwrap();
        queue
            .process_queue(&RecordingApi::default())
            .await
            .unwrap()
            .unwrap();

        let mut dropped = None;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Sync(SyncEvent::ItemDropped { item_id, retry_count, .. }) = event {
                dropped = Some((item_id, retry_count));
            }
        }
        assert_eq!(dropped, Some((item.id.to_string(), 1)));
    }

    #[tokio::test]
    async fn test_overlapping_drain_is_a_no_op() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store).await;
        queue
            .enqueue(SyncType::Create, "/journal/entries", json!({"name": "A"}))
            .await
            .unwrap();
        let api = RecordingApi {
            delay: Duration::from_millis(50),
            ..Default::default()
        };

        let (first, second) = tokio::join!(queue.process_queue(&api), queue.process_queue(&api));

        assert_eq!(first.unwrap().unwrap().processed, 1);
        assert!(second.unwrap().is_none());
        assert_eq!(api.seen.lock().unwrap().len(), 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn test_items_enqueued_during_drain_survive() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store).await;
        queue
            .enqueue(SyncType::Create, "/mood/entries", json!({"name": "A"}))
            .await
            .unwrap();
        let api = RecordingApi {
            delay: Duration::from_millis(50),
            ..Default::default()
        };

        let late = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue
                .enqueue(SyncType::Create, "/mood/entries", json!({"name": "late"}))
                .await
                .unwrap()
        };
        let (report, late_item) = tokio::join!(queue.process_queue(&api), late);

        let report = report.unwrap().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.pending().await, vec![late_item]);
    }

    #[tokio::test]
    async fn test_update_and_delete_use_payload_id() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store).await;

        let mut api = MockApi::new();
        api.expect_update()
            .with(
                eq(ResourceKind::JournalEntries),
                function(|id: &str| id == "j1"),
                always(),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        api.expect_delete()
            .with(eq(ResourceKind::Assessments), function(|id: &str| id == "42"))
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_create().never();

        queue
            .enqueue(SyncType::Update, "/journal/entries", json!({"id": "j1", "title": "Day 3"}))
            .await
            .unwrap();
        queue
            .enqueue(SyncType::Delete, "/assessments", json!({"id": 42}))
            .await
            .unwrap();
        queue
            .enqueue(SyncType::Delete, "/assessments", json!({"score": 3}))
            .await
            .unwrap();

        let report = queue.process_queue(&api).await.unwrap().unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(queue.pending().await[0].data, json!({"score": 3}));
    }

    #[tokio::test]
    async fn test_last_sync_is_stamped() {
        let store = Arc::new(MemoryStore::default());
        let (queue, clock) = queue_with(store).await;
        assert_eq!(queue.last_sync().await.unwrap(), None);

        let item = queue
            .enqueue(SyncType::Create, "/mood/entries", json!({"mood": "calm"}))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));

        queue
            .process_queue(&RecordingApi::default())
            .await
            .unwrap()
            .unwrap();

        assert!(queue.is_empty().await);
        let last_sync = queue.last_sync().await.unwrap().unwrap();
        assert!(last_sync >= item.timestamp);
    }

    #[tokio::test]
    async fn test_clear_and_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let (queue, _clock) = queue_with(store.clone()).await;
        queue
            .enqueue(SyncType::Create, "/mood/entries", json!({}))
            .await
            .unwrap();

        queue.shutdown().await.unwrap();
        assert!(store.get(QUEUE_KEY).await.unwrap().is_some());

        queue.clear().await.unwrap();
        assert_eq!(queue.len().await, 0);
        assert!(store.get(QUEUE_KEY).await.unwrap().is_none());
    }

    #[test]
    fn test_transient_classification() {
        let offline = SyncError::Api(ApiError::new(ErrorKind::Transport, "offline", "/x"));
        let rejected = SyncError::Api(ApiError::from_status(422, "invalid", "/x"));
        assert!(offline.is_transient());
        assert!(!rejected.is_transient());
    }
}
