//! Offline write replay and conflict handling.

pub mod conflict;
pub mod queue;

pub use conflict::{merge_data, ConflictResolver, Subscription};
pub use queue::{OfflineQueue, SyncMode, SyncReport};
