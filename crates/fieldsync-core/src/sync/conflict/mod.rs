//! Conflict detection and resolution.
//!
//! A conflict exists when the server copy of a document was written after
//! the local snapshot it is compared against. Each conflict carries a
//! default strategy picked per collection; callers may override it.

mod detector;
mod merge;
mod resolver;

pub use detector::{default_strategy, detect};
pub use merge::{merge_data, next_version};
pub use resolver::{
    resolved_data, ConflictResolver, Subscription, RESOLVED_AT_FIELD, RESOLVED_FLAG_FIELD,
};
