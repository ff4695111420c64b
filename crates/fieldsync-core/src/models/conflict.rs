//! Conflict models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::document::Document;

/// Policy used to reconcile a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep the server snapshot
    ServerWins,
    /// Keep the local snapshot
    ClientWins,
    /// Keep whichever snapshot has the larger timestamp
    TimestampWins,
    /// Field-level merge
    Merge,
    /// Leave for a human to decide
    Manual,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "server-wins",
            Self::ClientWins => "client-wins",
            Self::TimestampWins => "timestamp-wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server-wins" => Ok(Self::ServerWins),
            "client-wins" => Ok(Self::ClientWins),
            "timestamp-wins" => Ok(Self::TimestampWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy '{other}'"
            ))),
        }
    }
}

/// A detected divergence between the local and server copies of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    /// `{collection}_{docId}_{detectedAtMillis}`
    pub id: String,
    pub collection: String,
    pub doc_id: String,
    pub local_data: Document,
    pub server_data: Document,
    /// Local baseline (Unix ms)
    pub local_timestamp: i64,
    /// Server last-write time (Unix ms)
    pub server_timestamp: i64,
    /// Strategy assigned at detection time
    pub strategy: ResolutionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

impl ConflictData {
    /// Build the composite conflict id
    #[must_use]
    pub fn make_id(collection: &str, doc_id: &str, detected_at: i64) -> String {
        format!("{collection}_{doc_id}_{detected_at}")
    }
}

/// Audit record of a resolved conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConflictRecord {
    pub conflict_id: String,
    pub collection: String,
    pub doc_id: String,
    /// Strategy actually applied
    pub strategy: ResolutionStrategy,
    pub local_timestamp: i64,
    pub server_timestamp: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    /// Whether the write went through a read-modify-write transaction
    #[serde(default)]
    pub transactional: bool,
}
