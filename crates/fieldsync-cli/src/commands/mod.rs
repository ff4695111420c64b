pub mod common;
pub mod completions;
pub mod conflicts;
pub mod queue;
pub mod remote;
pub mod tester;
