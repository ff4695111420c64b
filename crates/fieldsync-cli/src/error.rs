use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0} operations need --data with a JSON object")]
    MissingData(&'static str),
    #[error("delete operations do not take --data")]
    UnexpectedData,
    #[error("Invalid queue item id: {0}")]
    InvalidItemId(String),
    #[error("Queue item not found: {0}")]
    ItemNotFound(String),
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
}
