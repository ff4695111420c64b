//! Conflict detection and the per-collection strategy policy

use crate::models::{str_field, ConflictData, Document, ResolutionStrategy};
use crate::remote::RemoteDocument;

/// Approval workflows: a stale local approval must not override a pending server copy
const REQUEST_COLLECTIONS: [&str; 2] = ["taskRequests", "activityRequests"];
/// Authoritative time records
const TIMESHEET_COLLECTIONS: [&str; 2] = ["timesheets", "plantAssetTimesheets"];
const MESSAGE_COLLECTIONS: [&str; 1] = ["messages"];

/// Pick the default strategy for a conflict in `collection`
pub fn default_strategy(collection: &str, local: &Document, server: &Document) -> ResolutionStrategy {
    if REQUEST_COLLECTIONS.contains(&collection) {
        let stale_approval = str_field(local, "status") == Some("Approved")
            && str_field(server, "status") == Some("Pending");
        if stale_approval {
            ResolutionStrategy::ServerWins
        } else {
            ResolutionStrategy::Merge
        }
    } else if TIMESHEET_COLLECTIONS.contains(&collection) {
        ResolutionStrategy::ServerWins
    } else if MESSAGE_COLLECTIONS.contains(&collection) {
        ResolutionStrategy::Merge
    } else {
        ResolutionStrategy::TimestampWins
    }
}

/// Compare a local snapshot against the server copy.
///
/// Returns `None` unless the server has a write newer than the local baseline.
pub fn detect(
    local_data: &Document,
    local_timestamp: i64,
    server: &RemoteDocument,
    detected_at: i64,
) -> Option<ConflictData> {
    if server.update_time <= local_timestamp {
        return None;
    }

    let strategy = default_strategy(&server.collection, local_data, &server.data);
    Some(ConflictData {
        id: ConflictData::make_id(&server.collection, &server.id, detected_at),
        collection: server.collection.clone(),
        doc_id: server.id.clone(),
        local_data: local_data.clone(),
        server_data: server.data.clone(),
        local_timestamp,
        server_timestamp: server.update_time,
        strategy,
        resolved_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document_from_value;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        document_from_value(value).unwrap()
    }

    fn server(collection: &str, data: serde_json::Value, update_time: i64) -> RemoteDocument {
        RemoteDocument {
            collection: collection.to_string(),
            id: "doc-1".to_string(),
            data: doc(data),
            update_time,
        }
    }

    #[test]
    fn test_no_conflict_when_local_is_at_least_as_fresh() {
        let local = doc(json!({"a": 1}));
        for (local_ts, server_ts) in [(1000, 1000), (2000, 1000), (i64::MAX, 0)] {
            let remote = server("messages", json!({"a": 2}), server_ts);
            assert!(detect(&local, local_ts, &remote, 5).is_none());
        }
    }

    #[test]
    fn test_conflict_when_server_is_newer() {
        let local = doc(json!({"a": 1}));
        let remote = server("messages", json!({"a": 2}), 1001);

        let conflict = detect(&local, 1000, &remote, 77).unwrap();
        assert_eq!(conflict.id, "messages_doc-1_77");
        assert_eq!(conflict.local_timestamp, 1000);
        assert_eq!(conflict.server_timestamp, 1001);
        assert_eq!(conflict.strategy, ResolutionStrategy::Merge);
        assert!(conflict.resolved_at.is_none());
    }

    #[test]
    fn test_request_collections_protect_pending_server_status() {
        let approved = doc(json!({"status": "Approved"}));
        let pending = doc(json!({"status": "Pending"}));
        let rejected = doc(json!({"status": "Rejected"}));

        for collection in ["taskRequests", "activityRequests"] {
            assert_eq!(
                default_strategy(collection, &approved, &pending),
                ResolutionStrategy::ServerWins
            );
            assert_eq!(
                default_strategy(collection, &approved, &rejected),
                ResolutionStrategy::Merge
            );
            assert_eq!(
                default_strategy(collection, &pending, &approved),
                ResolutionStrategy::Merge
            );
        }
    }

    #[test]
    fn test_timesheets_always_keep_server_copy() {
        let any = doc(json!({}));
        assert_eq!(
            default_strategy("timesheets", &any, &any),
            ResolutionStrategy::ServerWins
        );
        assert_eq!(
            default_strategy("plantAssetTimesheets", &any, &any),
            ResolutionStrategy::ServerWins
        );
    }

    #[test]
    fn test_other_collections_use_timestamps() {
        let any = doc(json!({}));
        assert_eq!(default_strategy("messages", &any, &any), ResolutionStrategy::Merge);
        assert_eq!(
            default_strategy("plantAssets", &any, &any),
            ResolutionStrategy::TimestampWins
        );
    }
}
