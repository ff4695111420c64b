//! Wiring for the offline subsystem shared by every client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::OfflineConfig;
use crate::connectivity::{Connectivity, HttpConnectivity, SimulatedConnectivity, StaticConnectivity};
use crate::remote::{RemoteStore, SqliteRemoteStore};
use crate::storage::{LocalStore, SqliteLocalStore};
use crate::sync::{ConflictResolver, OfflineQueue};
use crate::tester::OfflineTester;
use crate::Result;

/// Resolver, queue and tester built over one set of stores.
#[derive(Clone)]
pub struct OfflineService {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: Arc<SimulatedConnectivity>,
    pub resolver: Arc<ConflictResolver>,
    pub queue: Arc<OfflineQueue>,
    pub tester: Arc<OfflineTester>,
}

impl OfflineService {
    /// Build the subsystem over caller-supplied stores and reload persisted state.
    pub async fn open(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        config: OfflineConfig,
    ) -> Result<Self> {
        let connectivity = Arc::new(SimulatedConnectivity::new(connectivity));
        let resolver = Arc::new(
            ConflictResolver::open(Arc::clone(&local), Arc::clone(&remote), &config).await?,
        );
        let queue = Arc::new(
            OfflineQueue::open(
                Arc::clone(&local),
                Arc::clone(&remote),
                Arc::clone(&resolver),
                connectivity.clone(),
                config,
            )
            .await?,
        );
        let tester = Arc::new(OfflineTester::new(
            Arc::clone(&queue),
            Arc::clone(&resolver),
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
        ));

        Ok(Self {
            local,
            remote,
            connectivity,
            resolver,
            queue,
            tester,
        })
    }

    /// Open SQLite-backed stores at the given paths.
    ///
    /// Connectivity comes from the configured probe URL, or is assumed
    /// online when none is set.
    pub async fn open_paths(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<PathBuf>,
        config: OfflineConfig,
    ) -> Result<Self> {
        let local_path: PathBuf = local_path.into();
        let local = Arc::new(open_local_store(&local_path)?);
        let remote = Arc::new(SqliteRemoteStore::open(remote_path.into())?);
        let connectivity: Arc<dyn Connectivity> = match HttpConnectivity::from_config(&config)? {
            Some(probe) => Arc::new(probe),
            None => {
                tracing::info!("No connectivity probe configured, assuming online");
                Arc::new(StaticConnectivity::new(true))
            }
        };
        Self::open(local, remote, connectivity, config).await
    }

    /// In-memory stores (primarily for tests).
    pub async fn open_in_memory(config: OfflineConfig) -> Result<Self> {
        Self::open(
            Arc::new(SqliteLocalStore::open_in_memory()?),
            Arc::new(SqliteRemoteStore::open_in_memory()?),
            Arc::new(StaticConnectivity::new(true)),
            config,
        )
        .await
    }
}

/// Open the local store, quarantining a file that is not a database.
fn open_local_store(path: &Path) -> Result<SqliteLocalStore> {
    match SqliteLocalStore::open(path) {
        Ok(store) => Ok(store),
        Err(error) if is_corrupted_db_error(&error) => {
            tracing::warn!(
                "Local store at {} is unreadable: {error}. Moving it aside and starting fresh.",
                path.display()
            );
            quarantine_corrupted_db_file(path)?;
            SqliteLocalStore::open(path)
        }
        Err(error) => Err(error),
    }
}

fn is_corrupted_db_error(error: &crate::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("malformed")
}

fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        return Ok(());
    }
    let timestamp = chrono::Utc::now().timestamp_millis();
    let base_name = db_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("local.db");
    let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

    std::fs::rename(db_path, &backup_path)?;
    tracing::warn!(
        "Moved corrupted local store from {} to {}",
        db_path.display(),
        backup_path.display()
    );

    for suffix in ["-wal", "-shm"] {
        let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
            tracing::warn!("Removed stale sidecar file {}", sidecar.display());
        }
    }
    Ok(())
}
