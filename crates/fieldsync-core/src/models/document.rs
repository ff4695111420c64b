//! Schemaless document payloads

use serde_json::Value;

use crate::error::{Error, Result};

/// A schemaless document body as stored locally and remotely.
pub type Document = serde_json::Map<String, Value>;

/// Convert an arbitrary JSON value into a document, rejecting non-objects.
pub fn document_from_value(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidInput(format!(
            "document must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Parse a JSON string into a document.
pub fn parse_document(raw: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(raw)?;
    document_from_value(value)
}

/// Read a string field from a document.
pub fn str_field<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
