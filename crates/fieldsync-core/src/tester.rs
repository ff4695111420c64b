//! Diagnostics for exercising the offline path by hand.
//!
//! The tester forces the device offline, queues sample writes against the
//! `offlineTests` collection, inspects the queue, and wipes offline state.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::connectivity::SimulatedConnectivity;
use crate::error::{Error, Result};
use crate::models::{
    document_from_value, ConflictData, EnqueueOptions, Priority, QueueItem, QueueItemId,
    QueueOperation,
};
use crate::remote::{RemoteStore, SetOptions};
use crate::state::SyncStatus;
use crate::storage::{is_offline_key, LocalStore};
use crate::sync::{ConflictResolver, OfflineQueue, SyncMode, SyncReport};
use crate::util::unix_millis_now;

/// Collection used by every sample write
pub const TEST_COLLECTION: &str = "offlineTests";
const TEST_ENTITY_TYPE: &str = "offline-test";
const CONFLICT_TEST_DOC_ID: &str = "conflict-sample";

/// Kind of sample write queued by [`OfflineTester::test_queue_operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOperationKind {
    Write,
    Update,
    Delete,
}

impl TestOperationKind {
    pub const fn priority(self) -> Priority {
        match self {
            Self::Write => Priority::P0,
            Self::Update => Priority::P1,
            Self::Delete => Priority::P2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for TestOperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write" => Ok(Self::Write),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown test operation '{other}'"))),
        }
    }
}

/// Display row for one queued item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItemView {
    pub id: QueueItemId,
    pub kind: &'static str,
    pub collection: String,
    pub doc_id: String,
    pub priority: Priority,
    pub retry_count: u32,
    pub age_ms: i64,
    pub last_error: Option<String>,
}

impl QueuedItemView {
    fn from_item(item: &QueueItem, now_ms: i64) -> Self {
        Self {
            id: item.id,
            kind: item.operation.kind(),
            collection: item.operation.collection().to_string(),
            doc_id: item.operation.doc_id().to_string(),
            priority: item.priority,
            retry_count: item.retry_count,
            age_ms: now_ms.saturating_sub(item.timestamp),
            last_error: item.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInspection {
    pub status: SyncStatus,
    /// Item count per priority tier, every tier present
    pub by_priority: BTreeMap<Priority, usize>,
    pub items: Vec<QueuedItemView>,
}

/// Result of [`OfflineTester::test_conflict_detection`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheck {
    /// Stale local record left in the queue
    pub item: QueueItem,
    pub conflict: Option<ConflictData>,
}

/// Result of [`OfflineTester::force_sync_test`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSyncOutcome {
    pub report: SyncReport,
    pub before: SyncStatus,
    pub after: SyncStatus,
    /// Pending items drained by the run
    pub drained: usize,
    /// Change in failed item count
    pub failed_delta: i64,
}

pub struct OfflineTester {
    queue: Arc<OfflineQueue>,
    resolver: Arc<ConflictResolver>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<SimulatedConnectivity>,
    scheduled_restore: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl OfflineTester {
    pub fn new(
        queue: Arc<OfflineQueue>,
        resolver: Arc<ConflictResolver>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<SimulatedConnectivity>,
    ) -> Self {
        Self {
            queue,
            resolver,
            local,
            remote,
            connectivity,
            scheduled_restore: parking_lot::Mutex::new(None),
        }
    }

    /// Force the device offline, optionally restoring after `duration`
    ///
    /// Must be called from within a Tokio runtime when `duration` is set.
    /// A new call replaces any previously scheduled restore.
    pub fn simulate_offline_mode(&self, duration: Option<Duration>) {
        self.cancel_scheduled_restore();
        self.connectivity.force_offline(true);

        let Some(duration) = duration else {
            tracing::info!("Simulating offline mode until restored");
            return;
        };

        tracing::info!("Simulating offline mode for {}ms", duration.as_millis());
        let connectivity = Arc::clone(&self.connectivity);
        let queue = Arc::clone(&self.queue);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(error) = go_online(&connectivity, &queue).await {
                tracing::warn!("Sync after simulated offline mode failed: {error}");
            }
        });
        *self.scheduled_restore.lock() = Some(handle);
    }

    /// Cancel a pending auto-restore; returns whether one was pending
    pub fn cancel_scheduled_restore(&self) -> bool {
        let Some(handle) = self.scheduled_restore.lock().take() else {
            return false;
        };
        let pending = !handle.is_finished();
        handle.abort();
        pending
    }

    /// End simulated offline mode and drain the queue if the device is online
    ///
    /// Returns `None` when the underlying signal still reports no connectivity.
    pub async fn restore_online_mode(&self) -> Result<Option<SyncReport>> {
        self.cancel_scheduled_restore();
        go_online(&self.connectivity, &self.queue).await
    }

    pub fn is_simulating_offline(&self) -> bool {
        self.connectivity.is_forced_offline()
    }

    /// Queue a sample write against the test collection
    pub async fn test_queue_operation(&self, kind: TestOperationKind) -> Result<QueueItem> {
        let now = unix_millis_now();
        let doc_id = format!("test-{now}");
        let data = document_from_value(json!({
            "testField": format!("{} sample", kind.as_str()),
            "testTimestamp": now,
        }))?;

        let operation = match kind {
            TestOperationKind::Write => QueueOperation::Set {
                collection: TEST_COLLECTION.to_string(),
                doc_id,
                data,
            },
            TestOperationKind::Update => QueueOperation::Update {
                collection: TEST_COLLECTION.to_string(),
                doc_id,
                data,
            },
            TestOperationKind::Delete => QueueOperation::Delete {
                collection: TEST_COLLECTION.to_string(),
                doc_id,
            },
        };

        let options =
            EnqueueOptions::with_priority(kind.priority()).entity_type(TEST_ENTITY_TYPE);
        let item = self.queue.enqueue(operation, options).await?;
        tracing::info!("Queued {} sample as {}", kind.as_str(), item.id);
        Ok(item)
    }

    /// Queue a stale local record, edit the server copy past it, and run detection
    pub async fn test_conflict_detection(&self) -> Result<ConflictCheck> {
        let local = document_from_value(json!({"testField": "local copy", "version": 1}))?;
        let item = self
            .queue
            .enqueue(
                QueueOperation::Set {
                    collection: TEST_COLLECTION.to_string(),
                    doc_id: CONFLICT_TEST_DOC_ID.to_string(),
                    data: local.clone(),
                },
                EnqueueOptions::with_priority(Priority::P3).entity_type(TEST_ENTITY_TYPE),
            )
            .await?;

        let server_copy = document_from_value(json!({"testField": "server copy", "version": 2}))?;
        let mut server = self
            .remote
            .set(
                TEST_COLLECTION,
                CONFLICT_TEST_DOC_ID,
                server_copy.clone(),
                SetOptions::REPLACE,
            )
            .await?;
        if server.update_time <= item.timestamp {
            // Same millisecond as the queued record; a second edit moves the stamp past it
            server = self
                .remote
                .set(
                    TEST_COLLECTION,
                    CONFLICT_TEST_DOC_ID,
                    server_copy,
                    SetOptions::REPLACE,
                )
                .await?;
        }
        tracing::debug!(
            "Staged server copy at {} over queued record at {}",
            server.update_time,
            item.timestamp
        );

        let conflict = self
            .resolver
            .detect_conflict(TEST_COLLECTION, CONFLICT_TEST_DOC_ID, &local, item.timestamp)
            .await?;

        match &conflict {
            Some(conflict) => tracing::info!(
                "Conflict check detected {} with strategy {}",
                conflict.id,
                conflict.strategy
            ),
            None => tracing::warn!("Conflict check did not detect a conflict"),
        }
        Ok(ConflictCheck { item, conflict })
    }

    /// Queue contents with a per-priority histogram
    pub async fn inspect_queue(&self) -> QueueInspection {
        let status = self.queue.get_sync_status().await;
        let items = self.queue.get_queued_items().await;
        let now = unix_millis_now();

        let mut by_priority = Priority::ALL
            .iter()
            .map(|priority| (*priority, 0))
            .collect::<BTreeMap<_, _>>();
        for item in &items {
            *by_priority.entry(item.priority).or_default() += 1;
        }

        QueueInspection {
            status,
            by_priority,
            items: items
                .iter()
                .map(|item| QueuedItemView::from_item(item, now))
                .collect(),
        }
    }

    /// Drain the queue and report how the status moved
    ///
    /// Fails with [`Error::Offline`] instead of producing an empty report.
    pub async fn force_sync_test(&self, mode: SyncMode) -> Result<ForceSyncOutcome> {
        if !self.queue.is_online().await {
            return Err(Error::Offline);
        }

        let before = self.queue.get_sync_status().await;
        let report = self.queue.sync_queue(mode).await?;
        let after = self.queue.get_sync_status().await;

        let failed_delta = i64::try_from(after.failed_count).unwrap_or(i64::MAX)
            - i64::try_from(before.failed_count).unwrap_or(i64::MAX);
        let outcome = ForceSyncOutcome {
            drained: before.pending_count.saturating_sub(after.pending_count),
            failed_delta,
            report,
            before,
            after,
        };
        tracing::info!(
            "Forced {mode} sync drained {} items ({} still pending)",
            outcome.drained,
            outcome.after.pending_count
        );
        Ok(outcome)
    }

    /// Wipe every piece of offline state; returns the removed local keys
    ///
    /// Keys outside the offline prefixes are left alone.
    pub async fn clear_all_offline_data(&self) -> Result<Vec<String>> {
        self.queue.clear_failed_items().await?;
        self.resolver.clear_pending_conflicts().await?;
        self.resolver.clear_resolution_history().await?;

        let mut removed = Vec::new();
        for key in self.local.all_keys().await? {
            if is_offline_key(&key) {
                self.local.remove(&key).await?;
                removed.push(key);
            }
        }

        // Resync in-memory state with the wiped store
        self.queue.load().await?;
        self.resolver.init().await?;

        tracing::warn!("Cleared {} offline keys", removed.len());
        Ok(removed)
    }
}

async fn go_online(
    connectivity: &SimulatedConnectivity,
    queue: &OfflineQueue,
) -> Result<Option<SyncReport>> {
    connectivity.force_offline(false);
    tracing::info!("Restored online mode");

    if !queue.is_online().await {
        tracing::info!("Device still offline, queue left for later");
        return Ok(None);
    }
    queue.sync_queue(SyncMode::Auto).await.map(Some)
}

/// Serialize a diagnostic result for display
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
