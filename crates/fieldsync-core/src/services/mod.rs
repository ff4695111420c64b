//! Services shared across clients.

mod offline;

pub use offline::OfflineService;
