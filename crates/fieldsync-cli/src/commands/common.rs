use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fieldsync_core::models::{parse_document, ConflictData, ResolvedConflictRecord};
use fieldsync_core::{Document, OfflineConfig, OfflineService, QueueItem};

use crate::error::CliError;

pub const LOCAL_DB_FILE: &str = "local.db";
pub const REMOTE_DB_FILE: &str = "remote.db";
pub const CONFIG_FILE: &str = "config.json";

/// Resolved on-disk locations for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliPaths {
    pub local_db: PathBuf,
    pub remote_db: PathBuf,
    pub config: PathBuf,
}

pub fn resolve_paths(
    cli_data_dir: Option<PathBuf>,
    cli_config: Option<PathBuf>,
) -> Result<CliPaths, CliError> {
    let data_dir = match cli_data_dir.or_else(|| env::var_os("FIELDSYNC_DATA_DIR").map(PathBuf::from)) {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config = match cli_config.or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from)) {
        Some(path) => path,
        None => default_config_path()?,
    };

    Ok(CliPaths {
        local_db: data_dir.join(LOCAL_DB_FILE),
        remote_db: data_dir.join(REMOTE_DB_FILE),
        config,
    })
}

pub fn default_data_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync"))
        .ok_or_else(|| CliError::Config("failed to resolve CLI data directory".to_string()))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join(CONFIG_FILE))
        .ok_or_else(|| CliError::Config("failed to resolve CLI config directory".to_string()))
}

pub async fn open_service(paths: &CliPaths, offline: bool) -> Result<OfflineService, CliError> {
    let config = OfflineConfig::load(&paths.config)?;
    let service = OfflineService::open_paths(&paths.local_db, &paths.remote_db, config).await?;
    if offline {
        service.tester.simulate_offline_mode(None);
    }
    Ok(service)
}

/// Parse a `--data` argument into a document
pub fn parse_data_arg(raw: &str) -> Result<Document, CliError> {
    Ok(parse_document(raw.trim())?)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |datetime| datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff_minutes = (now_ms - timestamp_ms).max(0) / 60_000;
    if diff_minutes < 1 {
        "just now".to_string()
    } else if diff_minutes < 60 {
        format!("{diff_minutes}m ago")
    } else if diff_minutes < 24 * 60 {
        format!("{}h ago", diff_minutes / 60)
    } else {
        format!("{}d ago", diff_minutes / (24 * 60))
    }
}

pub fn format_queue_item_lines(items: &[QueueItem], now_ms: i64) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{} {} {:<6} {}/{} ({}, {})",
                item.id,
                item.priority,
                item.operation.kind(),
                item.operation.collection(),
                item.operation.doc_id(),
                item.entity_type,
                format_relative_time(item.timestamp, now_ms)
            );
            if item.retry_count > 0 {
                line.push_str(&format!(" retries={}", item.retry_count));
            }
            if let Some(error) = &item.last_error {
                line.push_str(&format!(" last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictData]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{} {}/{} local={} server={} default={}",
                conflict.id,
                conflict.collection,
                conflict.doc_id,
                format_timestamp(conflict.local_timestamp),
                format_timestamp(conflict.server_timestamp),
                conflict.strategy
            )
        })
        .collect()
}

pub fn format_history_lines(records: &[ResolvedConflictRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let suffix = if record.transactional { " (transaction)" } else { "" };
            format!(
                "{} {}/{} {} at {}{suffix}",
                record.conflict_id,
                record.collection,
                record.doc_id,
                record.strategy,
                format_timestamp(record.resolved_at)
            )
        })
        .collect()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
