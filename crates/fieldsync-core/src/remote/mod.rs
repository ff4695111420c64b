//! Remote document store abstraction.
//!
//! The remote store is the eventual source of truth. The queue and resolver
//! only need point reads, point writes (replace or merge), updates, deletes
//! and a single-document read-modify-write transaction.

mod sqlite;

pub use sqlite::SqliteRemoteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Document;

/// A document as held by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub collection: String,
    pub id: String,
    pub data: Document,
    /// Server last-write time (Unix ms)
    pub update_time: i64,
}

/// Write options for `RemoteStore::set`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Overwrite only the supplied top-level fields
    pub merge: bool,
}

impl SetOptions {
    pub const MERGE: Self = Self { merge: true };
    pub const REPLACE: Self = Self { merge: false };
}

/// Computes the new document body from the current server copy.
///
/// Returning an error aborts the transaction without writing.
pub type TransactionFn = Box<dyn FnOnce(Option<&RemoteDocument>) -> Result<Document> + Send>;

/// Schemaless document database
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Point read by id
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<RemoteDocument>>;

    /// Create or overwrite a document
    async fn set(
        &self,
        collection: &str,
        doc_id: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<RemoteDocument>;

    /// Patch fields of an existing document; fails with `NotFound` when missing
    async fn update(&self, collection: &str, doc_id: &str, data: Document)
        -> Result<RemoteDocument>;

    /// Delete a document (no-op when missing)
    async fn delete(&self, collection: &str, doc_id: &str) -> Result<()>;

    /// Documents of a collection, most recently written first
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<RemoteDocument>>;

    /// Atomic read-modify-write of one document
    async fn transaction(
        &self,
        collection: &str,
        doc_id: &str,
        apply: TransactionFn,
    ) -> Result<RemoteDocument>;
}

/// Overlay `patch` onto `base` at the top level
pub fn merge_fields(base: &mut Document, patch: Document) {
    for (key, value) in patch {
        base.insert(key, value);
    }
}
