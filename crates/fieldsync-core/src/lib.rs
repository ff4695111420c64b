//! fieldsync-core - Offline write queue and conflict resolution
//!
//! This crate contains the queue, the conflict resolver, the offline tester
//! and the local/remote store abstractions used by every fieldsync client.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod storage;
pub mod sync;
pub mod tester;
pub mod util;

pub use config::OfflineConfig;
pub use error::{Error, Result};
pub use models::{ConflictData, Document, Priority, QueueItem, QueueItemId, QueueOperation};
pub use services::OfflineService;
pub use state::{SyncState, SyncStatus};
pub use sync::{ConflictResolver, OfflineQueue, SyncMode, SyncReport};
pub use tester::OfflineTester;
