//! Device-local key-value persistence.
//!
//! The local store is a single shared key space. Each component owns a key
//! prefix by convention:
//!
//! - `@offline_` for queue items
//! - `@sync_` for sync bookkeeping
//! - `@data_conflicts` for pending conflicts and resolution history
//!
//! Keys outside these prefixes (for example `@permissions_cache`) belong to
//! other subsystems and are never touched by the offline reset.

mod memory;
mod sqlite;

pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Key holding the serialized offline queue
pub const QUEUE_KEY: &str = "@offline_queue";
/// Key holding the last sync report
pub const SYNC_STATUS_KEY: &str = "@sync_status";
/// Key holding the server `update_time` of the queue's own latest writes
pub const ACKED_WRITES_KEY: &str = "@sync_acked_writes";
/// Key holding the pending conflict list
pub const CONFLICTS_KEY: &str = "@data_conflicts";
/// Key holding the resolved conflict history
pub const CONFLICT_HISTORY_KEY: &str = "@data_conflicts_history";

/// Prefixes owned by the offline subsystem
pub const OFFLINE_KEY_PREFIXES: [&str; 3] = ["@offline_", "@sync_", "@data_conflicts"];

/// Whether a key belongs to the offline subsystem
pub fn is_offline_key(key: &str) -> bool {
    OFFLINE_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// String-keyed persistent storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value (no-op when missing)
    async fn remove(&self, key: &str) -> Result<()>;

    /// List every key, sorted
    async fn all_keys(&self) -> Result<Vec<String>>;
}

/// Read and deserialize a JSON value
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn LocalStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}
