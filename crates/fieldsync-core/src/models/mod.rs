//! Data models for fieldsync

mod conflict;
mod document;
mod queue_item;

pub use conflict::{ConflictData, ResolutionStrategy, ResolvedConflictRecord};
pub use document::{document_from_value, parse_document, str_field, Document};
pub use queue_item::{EnqueueOptions, Priority, QueueItem, QueueItemId, QueueOperation};
