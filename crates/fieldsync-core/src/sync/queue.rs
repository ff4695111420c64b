//! Durable offline write queue.
//!
//! Mutations made while offline are appended here, persisted to the local
//! store under [`QUEUE_KEY`], and replayed against the remote store in
//! priority order once the device is online.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::conflict::ConflictResolver;
use crate::config::OfflineConfig;
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::models::{EnqueueOptions, Priority, QueueItem, QueueItemId, QueueOperation};
use crate::remote::{RemoteStore, SetOptions};
use crate::state::SyncStatus;
use crate::storage::{
    load_json, save_json, LocalStore, ACKED_WRITES_KEY, QUEUE_KEY, SYNC_STATUS_KEY,
};
use crate::util::unix_millis_now;

/// Which queued items a drain considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Items under the retry budget whose back-off has elapsed
    #[default]
    Auto,
    /// P0 items under the retry budget, ignoring back-off
    Critical,
    /// Every item, including failed ones
    Full,
}

impl SyncMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Critical => "critical",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "critical" => Ok(Self::Critical),
            "full" => Ok(Self::Full),
            other => Err(Error::InvalidInput(format!("unknown sync mode '{other}'"))),
        }
    }
}

/// Outcome of one drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Items picked up by this drain
    pub attempted: usize,
    /// Items written as queued
    pub synced: usize,
    /// Items that failed and stay queued
    pub failed: usize,
    /// Queued items the mode did not pick up
    pub skipped: usize,
    /// Items handed to the conflict resolver instead of being written
    pub conflicts: usize,
    /// Set when this call waited for a drain already in flight
    #[serde(default)]
    pub joined: bool,
    pub started_at: i64,
    pub completed_at: i64,
}

impl SyncReport {
    const fn empty(mode: SyncMode, started_at: i64) -> Self {
        Self {
            mode,
            attempted: 0,
            synced: 0,
            failed: 0,
            skipped: 0,
            conflicts: 0,
            joined: false,
            started_at,
            completed_at: started_at,
        }
    }
}

enum ItemOutcome {
    Written,
    Conflict,
}

/// Clears the syncing flag when a drain ends, including on cancellation
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Prioritized, persistent queue of pending remote writes
pub struct OfflineQueue {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    resolver: Arc<ConflictResolver>,
    connectivity: Arc<dyn Connectivity>,
    config: OfflineConfig,
    items: Mutex<Vec<QueueItem>>,
    /// Server `update_time` of this queue's latest write, by `collection/docId`
    acked: Mutex<BTreeMap<String, i64>>,
    /// Serializes drains
    drain_lock: Mutex<()>,
    /// Bumped after every completed drain
    generation: AtomicU64,
    is_syncing: AtomicBool,
    last_report: parking_lot::Mutex<Option<SyncReport>>,
}

impl OfflineQueue {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        resolver: Arc<ConflictResolver>,
        connectivity: Arc<dyn Connectivity>,
        config: OfflineConfig,
    ) -> Self {
        Self {
            local,
            remote,
            resolver,
            connectivity,
            config,
            items: Mutex::new(Vec::new()),
            acked: Mutex::new(BTreeMap::new()),
            drain_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            is_syncing: AtomicBool::new(false),
            last_report: parking_lot::Mutex::new(None),
        }
    }

    /// Create a queue and reload persisted items
    pub async fn open(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        resolver: Arc<ConflictResolver>,
        connectivity: Arc<dyn Connectivity>,
        config: OfflineConfig,
    ) -> Result<Self> {
        let queue = Self::new(local, remote, resolver, connectivity, config);
        queue.load().await?;
        Ok(queue)
    }

    pub const fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub async fn is_online(&self) -> bool {
        self.connectivity.is_online().await
    }

    /// Reload items, acknowledged writes and the last sync report from the local store
    pub async fn load(&self) -> Result<()> {
        let items = match load_json::<Vec<QueueItem>>(self.local.as_ref(), QUEUE_KEY).await {
            Ok(items) => items.unwrap_or_default(),
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable offline queue: {error}");
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        let report = match load_json::<SyncReport>(self.local.as_ref(), SYNC_STATUS_KEY).await {
            Ok(report) => report,
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable sync status: {error}");
                None
            }
            Err(error) => return Err(error),
        };

        let acked = match load_json::<BTreeMap<String, i64>>(self.local.as_ref(), ACKED_WRITES_KEY)
            .await
        {
            Ok(acked) => acked.unwrap_or_default(),
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable write acknowledgements: {error}");
                BTreeMap::new()
            }
            Err(error) => return Err(error),
        };

        tracing::debug!("Loaded {} queued items", items.len());
        *self.items.lock().await = items;
        *self.acked.lock().await = acked;
        *self.last_report.lock() = report;
        Ok(())
    }

    /// Append a mutation and persist the queue
    pub async fn enqueue(
        &self,
        operation: QueueOperation,
        options: EnqueueOptions,
    ) -> Result<QueueItem> {
        let item = QueueItem::new(operation, options)?;

        let mut items = self.items.lock().await;
        items.push(item.clone());
        if let Err(error) = save_json(self.local.as_ref(), QUEUE_KEY, &*items).await {
            items.pop();
            return Err(error);
        }

        tracing::debug!(
            "Queued {} {}/{} at {} ({} bytes)",
            item.operation.kind(),
            item.operation.collection(),
            item.operation.doc_id(),
            item.priority,
            item.estimated_size
        );
        Ok(item)
    }

    /// Drain eligible items to the remote store
    ///
    /// Only one drain runs at a time. A call that arrives while a drain is in
    /// flight waits for it and returns its report with `joined` set.
    pub async fn sync_queue(&self, mode: SyncMode) -> Result<SyncReport> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _drain = self.drain_lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(mut report) = self.last_report.lock().clone() {
                tracing::debug!("Joined in-flight {} sync", report.mode);
                report.joined = true;
                return Ok(report);
            }
        }

        let report = {
            let _syncing = SyncingGuard::set(&self.is_syncing);
            self.drain(mode).await?
        };

        *self.last_report.lock() = Some(report.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        save_json(self.local.as_ref(), SYNC_STATUS_KEY, &report).await?;
        Ok(report)
    }

    async fn drain(&self, mode: SyncMode) -> Result<SyncReport> {
        let started_at = unix_millis_now();
        let mut report = SyncReport::empty(mode, started_at);

        if !self.connectivity.is_online().await {
            tracing::info!("Device offline, {mode} sync skipped");
            return Ok(report);
        }

        let batch = {
            let items = self.items.lock().await;
            let mut batch = items
                .iter()
                .filter(|item| self.is_eligible(item, mode, started_at))
                .cloned()
                .collect::<Vec<_>>();
            // Stable: FIFO within a priority tier
            batch.sort_by_key(|item| item.priority);
            report.skipped = items.len() - batch.len();
            batch
        };

        for item in batch {
            report.attempted += 1;
            match self.replay(&item).await {
                Ok(outcome) => {
                    match outcome {
                        ItemOutcome::Written => report.synced += 1,
                        ItemOutcome::Conflict => report.conflicts += 1,
                    }
                    self.remove_and_persist(&item.id).await?;
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        "Sync of {} {}/{} failed: {error}",
                        item.operation.kind(),
                        item.operation.collection(),
                        item.operation.doc_id()
                    );
                    self.record_failure(&item.id, error.to_string()).await?;
                }
            }
        }

        report.completed_at = unix_millis_now();
        tracing::info!(
            "{mode} sync finished: {} synced, {} conflicts, {} failed, {} skipped",
            report.synced,
            report.conflicts,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    fn is_eligible(&self, item: &QueueItem, mode: SyncMode, now_ms: i64) -> bool {
        let failed = item.is_failed(self.config.max_retries);
        match mode {
            SyncMode::Full => true,
            SyncMode::Critical => item.priority == Priority::P0 && !failed,
            SyncMode::Auto => !failed && self.backoff_elapsed(item, now_ms),
        }
    }

    fn backoff_elapsed(&self, item: &QueueItem, now_ms: i64) -> bool {
        let Some(last_attempt_at) = item.last_attempt_at else {
            return true;
        };
        let delay = i64::try_from(self.config.retry_delay(item.retry_count).as_millis())
            .unwrap_or(i64::MAX);
        now_ms.saturating_sub(last_attempt_at) >= delay
    }

    /// Write one item, routing it through the resolver when the server moved on
    ///
    /// The local baseline is the later of the item's creation time and this
    /// queue's last acknowledged write to the same document, so edits already
    /// pushed by an earlier item never count as server changes.
    async fn replay(&self, item: &QueueItem) -> Result<ItemOutcome> {
        let operation = &item.operation;
        let collection = operation.collection();
        let doc_id = operation.doc_id();

        if let Some(data) = operation.data() {
            if self.config.detect_conflicts_on_drain {
                let baseline = self
                    .acked_at(collection, doc_id)
                    .await
                    .map_or(item.timestamp, |acked| acked.max(item.timestamp));
                if let Some(conflict) = self
                    .resolver
                    .detect_conflict(collection, doc_id, data, baseline)
                    .await?
                {
                    match self.resolver.resolve_conflict(&conflict, None).await {
                        Ok(_) => {
                            let update_time = self
                                .remote
                                .get(collection, doc_id)
                                .await?
                                .map(|doc| doc.update_time);
                            self.acknowledge(collection, doc_id, update_time).await?;
                        }
                        Err(Error::ManualResolutionRequired(id)) => {
                            tracing::info!("Queued write to {collection}/{doc_id} parked as {id}");
                        }
                        Err(error) => return Err(error),
                    }
                    return Ok(ItemOutcome::Conflict);
                }
            }
        }

        let update_time = match operation {
            QueueOperation::Set { data, .. } => Some(
                self.remote
                    .set(collection, doc_id, data.clone(), SetOptions::REPLACE)
                    .await?
                    .update_time,
            ),
            QueueOperation::Update { data, .. } => Some(
                self.remote
                    .update(collection, doc_id, data.clone())
                    .await?
                    .update_time,
            ),
            QueueOperation::Delete { .. } => {
                self.remote.delete(collection, doc_id).await?;
                None
            }
        };

        tracing::debug!("Synced {} {collection}/{doc_id}", operation.kind());
        self.acknowledge(collection, doc_id, update_time).await?;
        Ok(ItemOutcome::Written)
    }

    async fn acked_at(&self, collection: &str, doc_id: &str) -> Option<i64> {
        self.acked
            .lock()
            .await
            .get(&ack_key(collection, doc_id))
            .copied()
    }

    /// Remember the server stamp of our own write; `None` forgets the document
    async fn acknowledge(
        &self,
        collection: &str,
        doc_id: &str,
        update_time: Option<i64>,
    ) -> Result<()> {
        let mut acked = self.acked.lock().await;
        let key = ack_key(collection, doc_id);
        match update_time {
            Some(update_time) => {
                acked.insert(key, update_time);
            }
            None => {
                if acked.remove(&key).is_none() {
                    return Ok(());
                }
            }
        }
        save_json(self.local.as_ref(), ACKED_WRITES_KEY, &*acked).await
    }

    async fn remove_and_persist(&self, id: &QueueItemId) -> Result<()> {
        let mut items = self.items.lock().await;
        items.retain(|item| &item.id != id);
        save_json(self.local.as_ref(), QUEUE_KEY, &*items).await
    }

    async fn record_failure(&self, id: &QueueItemId, error: String) -> Result<()> {
        let mut items = self.items.lock().await;
        // The item may have been removed while the remote call was running
        let Some(item) = items.iter_mut().find(|item| &item.id == id) else {
            return Ok(());
        };
        item.record_failure(error, unix_millis_now());
        save_json(self.local.as_ref(), QUEUE_KEY, &*items).await
    }

    /// Immediate status snapshot
    pub async fn get_sync_status(&self) -> SyncStatus {
        let (pending_count, failed_count) = {
            let items = self.items.lock().await;
            let failed = items
                .iter()
                .filter(|item| item.is_failed(self.config.max_retries))
                .count();
            (items.len(), failed)
        };

        SyncStatus {
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
            pending_count,
            failed_count,
            last_sync_at: self
                .last_report
                .lock()
                .as_ref()
                .map(|report| report.completed_at),
        }
    }

    /// Report of the most recent completed drain
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().clone()
    }

    /// Snapshot of every queued item in queue order
    pub async fn get_queued_items(&self) -> Vec<QueueItem> {
        self.items.lock().await.clone()
    }

    /// Drop items that exhausted their retry budget
    pub async fn clear_failed_items(&self) -> Result<usize> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| !item.is_failed(self.config.max_retries));
        let removed = before - items.len();
        if removed > 0 {
            save_json(self.local.as_ref(), QUEUE_KEY, &*items).await?;
            tracing::info!("Cleared {removed} failed queue items");
        }
        Ok(removed)
    }

    /// Discard one item; returns whether it was queued
    pub async fn remove_item(&self, id: &QueueItemId) -> Result<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| &item.id != id);
        if items.len() == before {
            return Ok(false);
        }
        save_json(self.local.as_ref(), QUEUE_KEY, &*items).await?;
        Ok(true)
    }
}

fn ack_key(collection: &str, doc_id: &str) -> String {
    format!("{collection}/{doc_id}")
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingRemote;
    use super::*;
    use std::time::Duration;

    use crate::connectivity::StaticConnectivity;
    use crate::models::{document_from_value, Document, ResolutionStrategy};
    use crate::storage::MemoryLocalStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct Fixture {
        local: Arc<MemoryLocalStore>,
        remote: Arc<RecordingRemote>,
        resolver: Arc<ConflictResolver>,
        connectivity: Arc<StaticConnectivity>,
        queue: Arc<OfflineQueue>,
    }

    async fn setup_with(config: OfflineConfig) -> Fixture {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(RecordingRemote::new());
        let connectivity = Arc::new(StaticConnectivity::new(true));
        let resolver = Arc::new(
            ConflictResolver::open(local.clone(), remote.clone(), &config)
                .await
                .unwrap(),
        );
        let queue = Arc::new(
            OfflineQueue::open(
                local.clone(),
                remote.clone(),
                resolver.clone(),
                connectivity.clone(),
                config,
            )
            .await
            .unwrap(),
        );
        Fixture {
            local,
            remote,
            resolver,
            connectivity,
            queue,
        }
    }

    async fn setup() -> Fixture {
        setup_with(OfflineConfig::default()).await
    }

    fn doc(value: Value) -> Document {
        document_from_value(value).unwrap()
    }

    fn set(collection: &str, doc_id: &str, data: Value) -> QueueOperation {
        QueueOperation::Set {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            data: doc(data),
        }
    }

    fn update(collection: &str, doc_id: &str, data: Value) -> QueueOperation {
        QueueOperation::Update {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            data: doc(data),
        }
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!(" CRITICAL ".parse::<SyncMode>().unwrap(), SyncMode::Critical);
        assert_eq!("full".parse::<SyncMode>().unwrap(), SyncMode::Full);
        assert!("everything".parse::<SyncMode>().is_err());
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_returning() {
        let fx = setup().await;
        let item = fx
            .queue
            .enqueue(set("notes", "n1", json!({"a": 1})), EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(item.priority, Priority::P2);
        assert_eq!(item.entity_type, "other");
        assert_eq!(item.retry_count, 0);
        assert!(item.estimated_size > 0);

        let stored: Vec<QueueItem> = load_json(fx.local.as_ref(), QUEUE_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, vec![item]);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_operation() {
        let fx = setup().await;
        let error = fx
            .queue
            .enqueue(set("", "n1", json!({})), EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_sync_drains_in_priority_order() {
        let fx = setup().await;
        for (doc_id, priority) in [("a", Priority::P2), ("b", Priority::P0), ("c", Priority::P1)] {
            fx.queue
                .enqueue(
                    set("notes", doc_id, json!({"id": doc_id})),
                    EnqueueOptions::with_priority(priority),
                )
                .await
                .unwrap();
        }

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 3);
        assert_eq!(
            fx.remote.writes(),
            vec!["set notes/b", "set notes/c", "set notes/a"]
        );
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_within_a_tier() {
        let fx = setup().await;
        for doc_id in ["first", "second", "third"] {
            fx.queue
                .enqueue(
                    set("notes", doc_id, json!({})),
                    EnqueueOptions::with_priority(Priority::P1),
                )
                .await
                .unwrap();
        }

        fx.queue.sync_queue(SyncMode::Auto).await.unwrap();
        assert_eq!(
            fx.remote.writes(),
            vec!["set notes/first", "set notes/second", "set notes/third"]
        );
    }

    #[tokio::test]
    async fn test_critical_sync_only_takes_p0() {
        let fx = setup().await;
        fx.queue
            .enqueue(set("notes", "low", json!({})), EnqueueOptions::with_priority(Priority::P3))
            .await
            .unwrap();
        fx.queue
            .enqueue(set("notes", "hot", json!({})), EnqueueOptions::with_priority(Priority::P0))
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Critical).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.remote.writes(), vec!["set notes/hot"]);

        let remaining = fx.queue.get_queued_items().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation.doc_id(), "low");
    }

    #[tokio::test]
    async fn test_offline_sync_leaves_queue_untouched() {
        let fx = setup().await;
        fx.queue
            .enqueue(set("notes", "n1", json!({})), EnqueueOptions::default())
            .await
            .unwrap();
        fx.connectivity.set_online(false);

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(fx.remote.writes().is_empty());

        let items = fx.queue.get_queued_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_backed_off() {
        let fx = setup_with(OfflineConfig {
            retry_base_delay_ms: 60_000,
            ..OfflineConfig::default()
        })
        .await;
        fx.remote.fail_collection(Some("notes"));
        fx.queue
            .enqueue(set("notes", "n1", json!({})), EnqueueOptions::default())
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Auto).await.unwrap();
        assert_eq!(report.failed, 1);

        let item = fx.queue.get_queued_items().await.remove(0);
        assert_eq!(item.retry_count, 1);
        assert!(item.last_attempt_at.is_some());
        assert!(item
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("notes unavailable")));

        // Still inside the back-off window
        let report = fx.queue.sync_queue(SyncMode::Auto).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped, 1);

        fx.remote.fail_collection(None);
        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_items_are_excluded_until_cleared() {
        let fx = setup_with(OfflineConfig {
            max_retries: 2,
            retry_base_delay_ms: 0,
            ..OfflineConfig::default()
        })
        .await;
        fx.remote.fail_collection(Some("notes"));
        fx.queue
            .enqueue(set("notes", "n1", json!({})), EnqueueOptions::with_priority(Priority::P0))
            .await
            .unwrap();

        fx.queue.sync_queue(SyncMode::Auto).await.unwrap();
        fx.queue.sync_queue(SyncMode::Auto).await.unwrap();

        let status = fx.queue.get_sync_status().await;
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.failed_count, 1);

        for mode in [SyncMode::Auto, SyncMode::Critical] {
            let report = fx.queue.sync_queue(mode).await.unwrap();
            assert_eq!(report.attempted, 0);
        }
        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.failed, 1);

        assert_eq!(fx.queue.clear_failed_items().await.unwrap(), 1);
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_of_missing_document_fails_without_aborting_drain() {
        let fx = setup().await;
        fx.queue
            .enqueue(
                QueueOperation::Update {
                    collection: "notes".to_string(),
                    doc_id: "ghost".to_string(),
                    data: doc(json!({"a": 1})),
                },
                EnqueueOptions::with_priority(Priority::P0),
            )
            .await
            .unwrap();
        fx.queue
            .enqueue(set("notes", "real", json!({})), EnqueueOptions::default())
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(fx.queue.get_queued_items().await.len(), 1);
    }

    #[tokio::test]
    async fn test_newer_server_copy_routes_through_resolver() {
        let fx = setup().await;
        let item = fx
            .queue
            .enqueue(
                set("timesheets", "ts-1", json!({"hours": 9})),
                EnqueueOptions::with_priority(Priority::P0),
            )
            .await
            .unwrap();
        fx.remote
            .inner
            .import_document("timesheets", "ts-1", doc(json!({"hours": 7})), item.timestamp + 10)
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.synced, 0);

        let stored = fx.remote.get("timesheets", "ts-1").await.unwrap().unwrap();
        assert_eq!(stored.data.get("hours"), Some(&json!(7)));
        assert_eq!(stored.data.get("resolvedConflict"), Some(&json!(true)));

        let history = fx.resolver.get_resolution_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].strategy, ResolutionStrategy::ServerWins);
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_own_writes_in_one_drain_are_not_conflicts() {
        let fx = setup().await;
        fx.queue
            .enqueue(set("notes", "n1", json!({"v": 1})), EnqueueOptions::default())
            .await
            .unwrap();
        fx.queue
            .enqueue(
                QueueOperation::Update {
                    collection: "notes".to_string(),
                    doc_id: "n1".to_string(),
                    data: doc(json!({"v": 2})),
                },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(report.conflicts, 0);

        let stored = fx.remote.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(stored.data.get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_detection_can_be_disabled() {
        let fx = setup_with(OfflineConfig {
            detect_conflicts_on_drain: false,
            ..OfflineConfig::default()
        })
        .await;
        let item = fx
            .queue
            .enqueue(set("timesheets", "ts-1", json!({"hours": 9})), EnqueueOptions::default())
            .await
            .unwrap();
        fx.remote
            .inner
            .import_document("timesheets", "ts-1", doc(json!({"hours": 7})), item.timestamp + 10)
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.synced, 1);
        let stored = fx.remote.get("timesheets", "ts-1").await.unwrap().unwrap();
        assert_eq!(stored.data.get("hours"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn test_concurrent_drains_are_single_flight() {
        let fx = setup().await;
        for doc_id in ["a", "b", "c"] {
            fx.queue
                .enqueue(set("notes", doc_id, json!({})), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let gate = fx.remote.hold_next_write();
        let first = tokio::spawn({
            let queue = fx.queue.clone();
            async move { queue.sync_queue(SyncMode::Full).await }
        });
        // First drain now holds the drain lock, parked inside its first write
        gate.entered.notified().await;
        assert!(fx.queue.get_sync_status().await.is_syncing);

        let mut second = Box::pin(fx.queue.sync_queue(SyncMode::Full));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut second)
                .await
                .is_err(),
            "second drain must wait for the first"
        );

        gate.release.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap();

        assert!(!first.joined);
        assert!(second.joined);
        assert_eq!(first.synced, 3);
        assert_eq!(second.synced, 3);
        assert_eq!(second.started_at, first.started_at);
        assert_eq!(fx.remote.writes().len(), 3);
        assert!(!fx.queue.get_sync_status().await.is_syncing);
    }

    #[tokio::test]
    async fn test_split_drains_keep_later_own_edit() {
        let fx = setup().await;
        fx.queue
            .enqueue(
                set("notes", "n1", json!({"v": 1})),
                EnqueueOptions::with_priority(Priority::P0),
            )
            .await
            .unwrap();
        fx.queue
            .enqueue(update("notes", "n1", json!({"v": 2})), EnqueueOptions::default())
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Critical).await.unwrap();
        assert_eq!(report.synced, 1);

        // Acknowledgements survive a restart
        let reopened = OfflineQueue::open(
            fx.local.clone(),
            fx.remote.clone(),
            fx.resolver.clone(),
            fx.connectivity.clone(),
            OfflineConfig::default(),
        )
        .await
        .unwrap();
        let report = reopened.sync_queue(SyncMode::Auto).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.conflicts, 0);

        let stored = fx.remote.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(stored.data.get("v"), Some(&json!(2)));
        assert_eq!(stored.data.get("resolvedConflict"), None);
        assert!(fx.resolver.get_resolution_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_retried_item_is_not_stale_against_own_write() {
        let fx = setup().await;
        fx.queue
            .enqueue(
                set("notes", "n1", json!({"v": 1})),
                EnqueueOptions::with_priority(Priority::P0),
            )
            .await
            .unwrap();
        fx.queue
            .enqueue(
                update("notes", "n1", json!({"v": 2})),
                EnqueueOptions::with_priority(Priority::P1),
            )
            .await
            .unwrap();

        fx.remote.fail_kind(Some("update"));
        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);

        fx.remote.fail_kind(None);
        let report = fx.queue.sync_queue(SyncMode::Full).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.conflicts, 0);

        let stored = fx.remote.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(stored.data.get("v"), Some(&json!(2)));
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_write_after_own_write_is_still_a_conflict() {
        let fx = setup().await;
        fx.queue
            .enqueue(
                set("notes", "n1", json!({"v": 1})),
                EnqueueOptions::with_priority(Priority::P0),
            )
            .await
            .unwrap();
        fx.queue
            .enqueue(update("notes", "n1", json!({"v": 2})), EnqueueOptions::default())
            .await
            .unwrap();
        fx.queue.sync_queue(SyncMode::Critical).await.unwrap();

        let ours = fx.remote.get("notes", "n1").await.unwrap().unwrap();
        fx.remote
            .inner
            .import_document("notes", "n1", doc(json!({"v": 9})), ours.update_time + 10)
            .await
            .unwrap();

        let report = fx.queue.sync_queue(SyncMode::Auto).await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.synced, 0);
    }

    #[tokio::test]
    async fn test_status_reports_last_sync_and_survives_restart() {
        let fx = setup().await;
        fx.queue
            .enqueue(set("notes", "n1", json!({})), EnqueueOptions::default())
            .await
            .unwrap();
        fx.connectivity.set_online(false);
        fx.queue.sync_queue(SyncMode::Auto).await.unwrap();

        let status = fx.queue.get_sync_status().await;
        assert!(!status.is_syncing);
        assert_eq!(status.pending_count, 1);
        assert!(status.last_sync_at.is_some());

        let reopened = OfflineQueue::open(
            fx.local.clone(),
            fx.remote.clone(),
            fx.resolver.clone(),
            fx.connectivity.clone(),
            OfflineConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.get_queued_items().await, fx.queue.get_queued_items().await);
        assert_eq!(reopened.get_sync_status().await.last_sync_at, status.last_sync_at);
    }

    #[tokio::test]
    async fn test_corrupted_queue_loads_as_empty() {
        let fx = setup().await;
        fx.local.set(QUEUE_KEY, "{broken").await.unwrap();
        fx.queue.load().await.unwrap();
        assert!(fx.queue.get_queued_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_item_discards_one_entry() {
        let fx = setup().await;
        let item = fx
            .queue
            .enqueue(set("notes", "n1", json!({})), EnqueueOptions::default())
            .await
            .unwrap();

        assert!(fx.queue.remove_item(&item.id).await.unwrap());
        assert!(!fx.queue.remove_item(&item.id).await.unwrap());
        assert!(fx.queue.get_queued_items().await.is_empty());
    }
}
