//! Schema-aware field merge of local and server snapshots.
//!
//! The server snapshot is the base. A few known fields get special treatment:
//!
//! - client bookkeeping fields are always taken from the local copy
//! - attachment-like arrays are unioned by item identity
//! - progress counters keep the larger value (never summed)
//! - `version` moves one past the larger of both sides

use serde_json::{Number, Value};

use crate::models::Document;

/// Fields that only make sense on the client
const CLIENT_ONLY_FIELDS: [&str; 3] = ["localId", "offlineCreated", "pendingSync"];
/// Arrays merged by identity
const UNION_ARRAY_FIELDS: [&str; 3] = ["images", "attachments", "comments"];
/// Monotonic counters merged by maximum
const COUNTER_FIELDS: [&str; 3] = ["completedToday", "quantity", "hours"];

const VERSION_FIELD: &str = "version";

/// Merge `local` into `server`
pub fn merge_data(local: &Document, server: &Document) -> Document {
    let mut merged = server.clone();

    for field in CLIENT_ONLY_FIELDS {
        if let Some(value) = local.get(field) {
            merged.insert(field.to_string(), value.clone());
        }
    }

    for field in UNION_ARRAY_FIELDS {
        if let Some(Value::Array(local_items)) = local.get(field) {
            let server_items = match server.get(field) {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            };
            merged.insert(
                field.to_string(),
                Value::Array(union_by_identity(server_items, local_items)),
            );
        }
    }

    for field in COUNTER_FIELDS {
        if let Some(value) = max_number(local.get(field), server.get(field)) {
            merged.insert(field.to_string(), value);
        }
    }

    merged.insert(
        VERSION_FIELD.to_string(),
        Value::from(next_version(local, server)),
    );

    merged
}

/// `max(local.version ?? 0, server.version ?? 1) + 1`
pub fn next_version(local: &Document, server: &Document) -> i64 {
    let local_version = local.get(VERSION_FIELD).and_then(as_version).unwrap_or(0);
    let server_version = server.get(VERSION_FIELD).and_then(as_version).unwrap_or(1);
    local_version.max(server_version).saturating_add(1)
}

/// Keep all server items, then append local items not already present
fn union_by_identity(server_items: &[Value], local_items: &[Value]) -> Vec<Value> {
    let mut merged = server_items.to_vec();
    for item in local_items {
        let identity = item_identity(item);
        if !merged.iter().any(|existing| item_identity(existing) == identity) {
            merged.push(item.clone());
        }
    }
    merged
}

/// An object's `id` field, or the item itself
fn item_identity(item: &Value) -> &Value {
    match item {
        Value::Object(map) => map.get("id").unwrap_or(item),
        _ => item,
    }
}

/// The larger of two optional numbers, preserving the original representation
fn max_number(local: Option<&Value>, server: Option<&Value>) -> Option<Value> {
    let local = local.and_then(Value::as_number);
    let server = server.and_then(Value::as_number);
    match (local, server) {
        (Some(l), Some(s)) => Some(Value::Number(if number_gt(l, s) { l.clone() } else { s.clone() })),
        (Some(n), None) | (None, Some(n)) => Some(Value::Number(n.clone())),
        (None, None) => None,
    }
}

fn number_gt(left: &Number, right: &Number) -> bool {
    match (left.as_i64(), right.as_i64()) {
        (Some(l), Some(r)) => l > r,
        _ => left.as_f64().unwrap_or(f64::NAN) > right.as_f64().unwrap_or(f64::NAN),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_version(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v.floor() as i64))
}
