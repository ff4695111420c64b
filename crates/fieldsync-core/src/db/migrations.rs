//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: local key-value store
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN TRANSACTION;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: document collections for the remote store emulator
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN TRANSACTION;
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            data TEXT NOT NULL,
            update_time INTEGER NOT NULL,
            PRIMARY KEY (collection, doc_id)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_update_time ON documents(update_time DESC);
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
