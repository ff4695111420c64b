//! `SQLite`-backed remote document store emulator.
//!
//! Serves as the remote store for the CLI and for tests. Every write stamps a
//! server `update_time` that is strictly greater than the previous one for the
//! same document.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{merge_fields, RemoteDocument, RemoteStore, SetOptions, TransactionFn};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Document;

pub struct SqliteRemoteStore {
    db: Mutex<Database>,
}

impl SqliteRemoteStore {
    /// Open (or create) a document store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    /// Open an in-memory document store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    /// Write a document with an explicit server timestamp
    ///
    /// Used to seed fixtures and to import exported collections.
    pub async fn import_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Document,
        update_time: i64,
    ) -> Result<RemoteDocument> {
        let db = self.db.lock().await;
        write_document(db.connection(), collection, doc_id, &data, update_time)?;
        Ok(RemoteDocument {
            collection: collection.to_string(),
            id: doc_id.to_string(),
            data,
            update_time,
        })
    }

    /// List documents in a collection, most recently written first
    pub async fn list_documents(&self, collection: &str, limit: usize) -> Result<Vec<RemoteDocument>> {
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(
            "SELECT collection, doc_id, data, update_time
             FROM documents
             WHERE collection = ?
             ORDER BY update_time DESC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(
                params![collection, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(collection, id, raw, update_time)| -> Result<RemoteDocument> {
                Ok(RemoteDocument {
                    collection,
                    id,
                    data: serde_json::from_str(&raw)?,
                    update_time,
                })
            })
            .collect()
    }
}

fn read_document(conn: &Connection, collection: &str, doc_id: &str) -> Result<Option<RemoteDocument>> {
    let row = conn
        .query_row(
            "SELECT data, update_time FROM documents WHERE collection = ? AND doc_id = ?",
            params![collection, doc_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    row.map(|(raw, update_time)| -> Result<RemoteDocument> {
        Ok(RemoteDocument {
            collection: collection.to_string(),
            id: doc_id.to_string(),
            data: serde_json::from_str(&raw)?,
            update_time,
        })
    })
    .transpose()
}

fn write_document(
    conn: &Connection,
    collection: &str,
    doc_id: &str,
    data: &Document,
    update_time: i64,
) -> Result<()> {
    let raw = serde_json::to_string(data)?;
    conn.execute(
        "INSERT INTO documents (collection, doc_id, data, update_time) VALUES (?, ?, ?, ?)
         ON CONFLICT(collection, doc_id) DO UPDATE SET data = excluded.data, update_time = excluded.update_time",
        params![collection, doc_id, raw, update_time],
    )?;
    Ok(())
}

/// Next server timestamp for a document, strictly after its previous write
fn next_update_time(previous: Option<&RemoteDocument>) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    previous.map_or(now, |doc| now.max(doc.update_time + 1))
}

fn stamped(collection: &str, doc_id: &str, data: Document, update_time: i64) -> RemoteDocument {
    RemoteDocument {
        collection: collection.to_string(),
        id: doc_id.to_string(),
        data,
        update_time,
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<RemoteDocument>> {
        let db = self.db.lock().await;
        read_document(db.connection(), collection, doc_id)
    }

    async fn set(
        &self,
        collection: &str,
        doc_id: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<RemoteDocument> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let existing = read_document(conn, collection, doc_id)?;
        let update_time = next_update_time(existing.as_ref());

        let body = match existing {
            Some(mut current) if options.merge => {
                merge_fields(&mut current.data, data);
                current.data
            }
            _ => data,
        };

        write_document(conn, collection, doc_id, &body, update_time)?;
        tracing::debug!("Remote set {collection}/{doc_id} (merge: {})", options.merge);
        Ok(stamped(collection, doc_id, body, update_time))
    }

    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        data: Document,
    ) -> Result<RemoteDocument> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let mut current = read_document(conn, collection, doc_id)?
            .ok_or_else(|| Error::NotFound(format!("{collection}/{doc_id}")))?;
        let update_time = next_update_time(Some(&current));

        merge_fields(&mut current.data, data);
        write_document(conn, collection, doc_id, &current.data, update_time)?;
        tracing::debug!("Remote update {collection}/{doc_id}");
        Ok(stamped(collection, doc_id, current.data, update_time))
    }

    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<RemoteDocument>> {
        self.list_documents(collection, limit).await
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM documents WHERE collection = ? AND doc_id = ?",
            params![collection, doc_id],
        )?;
        tracing::debug!("Remote delete {collection}/{doc_id}");
        Ok(())
    }

    async fn transaction(
        &self,
        collection: &str,
        doc_id: &str,
        apply: TransactionFn,
    ) -> Result<RemoteDocument> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let current = read_document(&tx, collection, doc_id)?;
        let update_time = next_update_time(current.as_ref());
        let body = apply(current.as_ref())?;

        write_document(&tx, collection, doc_id, &body, update_time)?;
        tx.commit()?;
        tracing::debug!("Remote transaction committed for {collection}/{doc_id}");
        Ok(stamped(collection, doc_id, body, update_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document_from_value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        document_from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_set_replace_and_merge() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();

        store
            .set("messages", "m1", doc(json!({"a": 1, "b": 2})), SetOptions::REPLACE)
            .await
            .unwrap();
        store
            .set("messages", "m1", doc(json!({"b": 3})), SetOptions::MERGE)
            .await
            .unwrap();
        let merged = store.get("messages", "m1").await.unwrap().unwrap();
        assert_eq!(merged.data, doc(json!({"a": 1, "b": 3})));

        store
            .set("messages", "m1", doc(json!({"c": 4})), SetOptions::REPLACE)
            .await
            .unwrap();
        let replaced = store.get("messages", "m1").await.unwrap().unwrap();
        assert_eq!(replaced.data, doc(json!({"c": 4})));
    }

    #[tokio::test]
    async fn test_update_time_advances() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        store
            .import_document("timesheets", "t1", doc(json!({"hours": 1})), future)
            .await
            .unwrap();

        let written = store
            .update("timesheets", "t1", doc(json!({"hours": 2})))
            .await
            .unwrap();
        assert_eq!(written.update_time, future + 1);
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        let error = store
            .update("timesheets", "missing", doc(json!({"hours": 2})))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        store
            .set("messages", "m1", doc(json!({})), SetOptions::REPLACE)
            .await
            .unwrap();
        store.delete("messages", "m1").await.unwrap();
        store.delete("messages", "m1").await.unwrap();
        assert!(store.get("messages", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_reads_current_copy() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        store
            .import_document("taskRequests", "r1", doc(json!({"count": 1})), 10)
            .await
            .unwrap();

        let written = store
            .transaction(
                "taskRequests",
                "r1",
                Box::new(|current: Option<&RemoteDocument>| {
                    let mut data = current.map(|doc| doc.data.clone()).unwrap_or_default();
                    let count = data.get("count").and_then(serde_json::Value::as_i64).unwrap_or(0);
                    data.insert("count".to_string(), json!(count + 1));
                    Ok(data)
                }),
            )
            .await
            .unwrap();

        assert_eq!(written.data, doc(json!({"count": 2})));
        assert!(written.update_time > 10);
    }

    #[tokio::test]
    async fn test_aborted_transaction_writes_nothing() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        store
            .import_document("taskRequests", "r1", doc(json!({"count": 1})), 10)
            .await
            .unwrap();

        let result = store
            .transaction(
                "taskRequests",
                "r1",
                Box::new(|_: Option<&RemoteDocument>| {
                    Err(Error::InvalidInput("nope".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());

        let current = store.get("taskRequests", "r1").await.unwrap().unwrap();
        assert_eq!(current.update_time, 10);
        assert_eq!(current.data, doc(json!({"count": 1})));
    }

    #[tokio::test]
    async fn test_list_documents() {
        let store = SqliteRemoteStore::open_in_memory().unwrap();
        store
            .import_document("messages", "old", doc(json!({})), 1)
            .await
            .unwrap();
        store
            .import_document("messages", "new", doc(json!({})), 2)
            .await
            .unwrap();
        store
            .import_document("other", "x", doc(json!({})), 3)
            .await
            .unwrap();

        let docs = store.list_documents("messages", 10).await.unwrap();
        let ids = docs.iter().map(|doc| doc.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
