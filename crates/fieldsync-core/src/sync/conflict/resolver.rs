//! Conflict resolver: detection against the remote store, strategy
//! application, the pending (manual) list and change subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{detector, merge_data};
use crate::config::OfflineConfig;
use crate::error::{Error, Result};
use crate::models::{ConflictData, Document, ResolutionStrategy, ResolvedConflictRecord};
use crate::remote::{RemoteDocument, RemoteStore, SetOptions};
use crate::storage::{load_json, save_json, LocalStore, CONFLICTS_KEY, CONFLICT_HISTORY_KEY};
use crate::util::unix_millis_now;

/// Bookkeeping field set on every resolved document
pub const RESOLVED_FLAG_FIELD: &str = "resolvedConflict";
/// Resolution time (Unix ms) set on every resolved document
pub const RESOLVED_AT_FIELD: &str = "conflictResolvedAt";

type Listener = Arc<dyn Fn(&[ConflictData]) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: SyncMutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, pending: &[ConflictData]) {
        // Snapshot first so a listener may (un)subscribe without deadlocking
        let listeners = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(pending);
        }
    }
}

/// Handle returned by [`ConflictResolver::subscribe`]
#[must_use = "dropping the handle keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Stop receiving pending-list changes
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Detects and reconciles divergence between local and server documents
pub struct ConflictResolver {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    history_limit: usize,
    pending: Mutex<Vec<ConflictData>>,
    history: Mutex<Vec<ResolvedConflictRecord>>,
    listeners: Arc<ListenerRegistry>,
}

impl ConflictResolver {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: &OfflineConfig,
    ) -> Self {
        Self {
            local,
            remote,
            history_limit: config.history_limit,
            pending: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            listeners: Arc::new(ListenerRegistry::default()),
        }
    }

    /// Create a resolver and reload persisted state
    pub async fn open(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: &OfflineConfig,
    ) -> Result<Self> {
        let resolver = Self::new(local, remote, config);
        resolver.init().await?;
        Ok(resolver)
    }

    /// Reload the pending list and history from the local store
    pub async fn init(&self) -> Result<()> {
        let pending: Vec<ConflictData> = self.load_or_empty(CONFLICTS_KEY).await?;
        let history: Vec<ResolvedConflictRecord> = self.load_or_empty(CONFLICT_HISTORY_KEY).await?;
        tracing::debug!(
            "Loaded {} pending conflicts and {} history records",
            pending.len(),
            history.len()
        );

        *self.pending.lock().await = pending;
        *self.history.lock().await = history;
        Ok(())
    }

    async fn load_or_empty<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match load_json(self.local.as_ref(), key).await {
            Ok(items) => Ok(items.unwrap_or_default()),
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable conflict state under {key}: {error}");
                Ok(Vec::new())
            }
            Err(error) => Err(error),
        }
    }

    /// Register a listener for pending-list changes
    ///
    /// Listeners run synchronously on every add/remove/clear.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[ConflictData]) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Compare a local snapshot against the current server copy
    pub async fn detect_conflict(
        &self,
        collection: &str,
        doc_id: &str,
        local_data: &Document,
        local_timestamp: i64,
    ) -> Result<Option<ConflictData>> {
        let Some(server) = self.remote.get(collection, doc_id).await? else {
            return Ok(None);
        };

        let conflict = detector::detect(
            local_data,
            local_timestamp,
            &server,
            unix_millis_now(),
        );
        if let Some(conflict) = &conflict {
            tracing::info!(
                "Conflict detected on {collection}/{doc_id} (local {}, server {}), default strategy {}",
                conflict.local_timestamp,
                conflict.server_timestamp,
                conflict.strategy
            );
        }
        Ok(conflict)
    }

    /// Resolve a conflict with `strategy` or its default strategy
    ///
    /// On success the written document (resolved data plus bookkeeping
    /// fields) is returned. `Manual` parks the conflict in the pending list
    /// and returns [`Error::ManualResolutionRequired`].
    pub async fn resolve_conflict(
        &self,
        conflict: &ConflictData,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<Document> {
        let strategy = strategy.unwrap_or(conflict.strategy);

        let Some(mut resolved) = resolved_data(conflict, strategy) else {
            self.add_pending(conflict.clone()).await?;
            tracing::info!("Conflict {} left for manual resolution", conflict.id);
            return Err(Error::ManualResolutionRequired(conflict.id.clone()));
        };

        let resolved_at = unix_millis_now();
        stamp_resolution(&mut resolved, resolved_at);

        self.remote
            .set(
                &conflict.collection,
                &conflict.doc_id,
                resolved.clone(),
                SetOptions::MERGE,
            )
            .await?;

        self.finish(conflict, strategy, resolved_at, false).await?;
        tracing::info!("Resolved conflict {} with {strategy}", conflict.id);
        Ok(resolved)
    }

    /// Merge against the current server copy inside one transaction
    ///
    /// Closes the window between detection and write in which another client
    /// may update the document.
    pub async fn resolve_with_transaction(&self, conflict: &ConflictData) -> Result<Document> {
        let local = conflict.local_data.clone();
        let detected_server = conflict.server_data.clone();
        let resolved_at = unix_millis_now();

        let written = self
            .remote
            .transaction(
                &conflict.collection,
                &conflict.doc_id,
                Box::new(move |current: Option<&RemoteDocument>| -> Result<Document> {
                    let server = current.map_or(&detected_server, |doc| &doc.data);
                    let mut merged = merge_data(&local, server);
                    stamp_resolution(&mut merged, resolved_at);
                    Ok(merged)
                }),
            )
            .await?;

        self.finish(conflict, ResolutionStrategy::Merge, resolved_at, true)
            .await?;
        tracing::info!("Resolved conflict {} in a transaction", conflict.id);
        Ok(written.data)
    }

    /// Resolve a conflict from the pending list by id
    pub async fn resolve_pending(
        &self,
        conflict_id: &str,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<Document> {
        let conflict = self
            .get_conflict(conflict_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        self.resolve_conflict(&conflict, strategy).await
    }

    /// Snapshot of conflicts awaiting manual resolution
    pub async fn get_unresolved_conflicts(&self) -> Vec<ConflictData> {
        self.pending.lock().await.clone()
    }

    pub async fn get_conflict(&self, conflict_id: &str) -> Option<ConflictData> {
        self.pending
            .lock()
            .await
            .iter()
            .find(|conflict| conflict.id == conflict_id)
            .cloned()
    }

    /// Resolved conflicts, oldest first
    pub async fn get_resolution_history(&self) -> Vec<ResolvedConflictRecord> {
        self.history.lock().await.clone()
    }

    pub async fn clear_resolution_history(&self) -> Result<()> {
        let mut history = self.history.lock().await;
        history.clear();
        self.local.remove(CONFLICT_HISTORY_KEY).await
    }

    /// Drop every pending conflict without resolving it
    pub async fn clear_pending_conflicts(&self) -> Result<()> {
        let snapshot = {
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                return Ok(());
            }
            pending.clear();
            save_json(self.local.as_ref(), CONFLICTS_KEY, &*pending).await?;
            pending.clone()
        };
        self.listeners.notify(&snapshot);
        Ok(())
    }

    async fn add_pending(&self, conflict: ConflictData) -> Result<()> {
        let snapshot = {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.iter_mut().find(|c| c.id == conflict.id) {
                *existing = conflict;
            } else {
                pending.push(conflict);
            }
            save_json(self.local.as_ref(), CONFLICTS_KEY, &*pending).await?;
            pending.clone()
        };
        self.listeners.notify(&snapshot);
        Ok(())
    }

    /// Evict a resolved conflict and append its history record
    async fn finish(
        &self,
        conflict: &ConflictData,
        strategy: ResolutionStrategy,
        resolved_at: i64,
        transactional: bool,
    ) -> Result<()> {
        let evicted = {
            let mut pending = self.pending.lock().await;
            let before = pending.len();
            pending.retain(|c| c.id != conflict.id);
            if pending.len() == before {
                None
            } else {
                save_json(self.local.as_ref(), CONFLICTS_KEY, &*pending).await?;
                Some(pending.clone())
            }
        };

        {
            let mut history = self.history.lock().await;
            history.push(ResolvedConflictRecord {
                conflict_id: conflict.id.clone(),
                collection: conflict.collection.clone(),
                doc_id: conflict.doc_id.clone(),
                strategy,
                local_timestamp: conflict.local_timestamp,
                server_timestamp: conflict.server_timestamp,
                resolved_at,
                transactional,
            });
            if history.len() > self.history_limit {
                let excess = history.len() - self.history_limit;
                history.drain(..excess);
            }
            save_json(self.local.as_ref(), CONFLICT_HISTORY_KEY, &*history).await?;
        }

        if let Some(snapshot) = evicted {
            self.listeners.notify(&snapshot);
        }
        Ok(())
    }
}

/// Apply a strategy to a conflict; `None` for `Manual`
pub fn resolved_data(conflict: &ConflictData, strategy: ResolutionStrategy) -> Option<Document> {
    match strategy {
        ResolutionStrategy::ServerWins => Some(conflict.server_data.clone()),
        ResolutionStrategy::ClientWins => Some(conflict.local_data.clone()),
        ResolutionStrategy::TimestampWins => {
            if conflict.local_timestamp > conflict.server_timestamp {
                Some(conflict.local_data.clone())
            } else {
                Some(conflict.server_data.clone())
            }
        }
        ResolutionStrategy::Merge => Some(merge_data(&conflict.local_data, &conflict.server_data)),
        ResolutionStrategy::Manual => None,
    }
}

fn stamp_resolution(data: &mut Document, resolved_at: i64) {
    data.insert(RESOLVED_FLAG_FIELD.to_string(), Value::Bool(true));
    data.insert(RESOLVED_AT_FIELD.to_string(), Value::from(resolved_at));
}
