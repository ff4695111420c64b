//! `SQLite`-backed local store

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::LocalStore;
use crate::db::Database;
use crate::error::Result;

/// Durable `LocalStore` persisted in the `kv_store` table
pub struct SqliteLocalStore {
    db: Mutex<Database>,
}

impl SqliteLocalStore {
    /// Open (or create) a local store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Open an in-memory local store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .connection()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .connection()
            .prepare("SELECT key FROM kv_store ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}
