//! Queue status snapshot types.

use serde::{Deserialize, Serialize};

/// Coarse sync state derived from a [`SyncStatus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    IdleWithPending,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::IdleWithPending => "idle_with_pending",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate view of the offline queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub pending_count: usize,
    /// Items that exhausted their retry budget
    pub failed_count: usize,
    /// Completion time of the last drain (Unix ms)
    pub last_sync_at: Option<i64>,
}

impl SyncStatus {
    pub const fn state(&self) -> SyncState {
        if self.is_syncing {
            SyncState::Syncing
        } else if self.pending_count > 0 {
            SyncState::IdleWithPending
        } else {
            SyncState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(is_syncing: bool, pending_count: usize) -> SyncStatus {
        SyncStatus {
            is_syncing,
            pending_count,
            failed_count: 0,
            last_sync_at: None,
        }
    }

    #[test]
    fn test_state_prefers_syncing() {
        assert_eq!(status(true, 3).state(), SyncState::Syncing);
        assert_eq!(status(false, 3).state(), SyncState::IdleWithPending);
        assert_eq!(status(false, 0).state(), SyncState::Idle);
    }

    #[test]
    fn test_status_uses_camel_case() {
        let value = serde_json::to_value(status(false, 2)).unwrap();
        assert_eq!(value["pendingCount"], 2);
        assert_eq!(value["isSyncing"], false);
    }
}
