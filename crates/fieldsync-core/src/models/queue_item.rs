//! Offline queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::document::Document;

/// A unique identifier for a queue item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new unique queue item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Urgency tier controlling drain order. `P0` is drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// All tiers, most urgent first
    pub const ALL: [Self; 4] = [Self::P0, Self::P1, Self::P2, Self::P3];

    /// Tier label as stored (`P0`..`P3`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            other => Err(Error::InvalidInput(format!("unknown priority '{other}'"))),
        }
    }
}

/// A pending mutation against a remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueOperation {
    /// Create or replace a document
    Set {
        collection: String,
        #[serde(rename = "docId")]
        doc_id: String,
        data: Document,
    },
    /// Patch fields of an existing document
    Update {
        collection: String,
        #[serde(rename = "docId")]
        doc_id: String,
        data: Document,
    },
    /// Remove a document
    Delete {
        collection: String,
        #[serde(rename = "docId")]
        doc_id: String,
    },
}

impl QueueOperation {
    /// Target collection name
    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    /// Target document id
    pub fn doc_id(&self) -> &str {
        match self {
            Self::Set { doc_id, .. } | Self::Update { doc_id, .. } | Self::Delete { doc_id, .. } => {
                doc_id
            }
        }
    }

    /// Payload carried by set/update operations
    pub const fn data(&self) -> Option<&Document> {
        match self {
            Self::Set { data, .. } | Self::Update { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }

    /// Operation kind label (`set`, `update`, `delete`)
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Reject operations that could never be replayed
    pub fn validate(&self) -> Result<()> {
        if self.collection().trim().is_empty() {
            return Err(Error::InvalidInput("collection must not be empty".into()));
        }
        if self.doc_id().trim().is_empty() {
            return Err(Error::InvalidInput("document id must not be empty".into()));
        }
        if self.collection().contains('/') || self.doc_id().contains('/') {
            return Err(Error::InvalidInput(
                "collection and document id must not contain '/'".into(),
            ));
        }
        Ok(())
    }
}

/// Options supplied when enqueueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub entity_type: String,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::default(),
            entity_type: "other".to_string(),
        }
    }
}

impl EnqueueOptions {
    /// Options with the given priority and the default entity type
    #[must_use]
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Set the entity type tag
    #[must_use]
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }
}

/// One durable pending write awaiting replay to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub operation: QueueOperation,
    pub priority: Priority,
    pub entity_type: String,
    /// Creation time (Unix ms), also the local baseline for conflict checks
    pub timestamp: i64,
    pub retry_count: u32,
    /// Byte length of the serialized operation
    pub estimated_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last failed attempt (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<i64>,
}

impl QueueItem {
    /// Create a new queue item stamped with the current time
    pub fn new(operation: QueueOperation, options: EnqueueOptions) -> Result<Self> {
        operation.validate()?;
        let estimated_size = serde_json::to_vec(&operation)?.len();
        Ok(Self {
            id: QueueItemId::new(),
            operation,
            priority: options.priority,
            entity_type: options.entity_type,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            estimated_size,
            last_error: None,
            last_attempt_at: None,
        })
    }

    /// Whether the item has used up its retry budget
    #[must_use]
    pub const fn is_failed(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// Record a failed drain attempt
    pub fn record_failure(&mut self, error: impl Into<String>, now_ms: i64) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn set_op() -> QueueOperation {
        QueueOperation::Set {
            collection: "timesheets".to_string(),
            doc_id: "ts-1".to_string(),
            data: json!({"hours": 8}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_priority_ordering() {
        let mut tiers = vec![Priority::P3, Priority::P0, Priority::P2, Priority::P1];
        tiers.sort();
        assert_eq!(tiers, Priority::ALL.to_vec());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("p0".parse::<Priority>().unwrap(), Priority::P0);
        assert_eq!(" P3 ".parse::<Priority>().unwrap(), Priority::P3);
        assert!("P9".parse::<Priority>().is_err());
    }

    #[test]
    fn test_operation_wire_format() {
        let value = serde_json::to_value(set_op()).unwrap();
        assert_eq!(
            value,
            json!({"type": "set", "collection": "timesheets", "docId": "ts-1", "data": {"hours": 8}})
        );

        let delete: QueueOperation = serde_json::from_value(
            json!({"type": "delete", "collection": "messages", "docId": "m-1"}),
        )
        .unwrap();
        assert_eq!(delete.kind(), "delete");
        assert!(delete.data().is_none());
    }

    #[test]
    fn test_operation_validation() {
        let op = QueueOperation::Delete {
            collection: " ".to_string(),
            doc_id: "x".to_string(),
        };
        assert!(op.validate().is_err());

        let op = QueueOperation::Delete {
            collection: "a/b".to_string(),
            doc_id: "x".to_string(),
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_queue_item_new() {
        let item = QueueItem::new(set_op(), EnqueueOptions::with_priority(Priority::P1)).unwrap();
        assert_eq!(item.priority, Priority::P1);
        assert_eq!(item.entity_type, "other");
        assert_eq!(item.retry_count, 0);
        assert!(item.timestamp > 0);
        assert_eq!(
            item.estimated_size,
            serde_json::to_vec(&item.operation).unwrap().len()
        );
    }

    #[test]
    fn test_record_failure() {
        let mut item = QueueItem::new(set_op(), EnqueueOptions::default()).unwrap();
        item.record_failure("network down", 42);
        item.record_failure("still down", 43);

        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("still down"));
        assert_eq!(item.last_attempt_at, Some(43));
        assert!(item.is_failed(2));
        assert!(!item.is_failed(3));
    }
}
