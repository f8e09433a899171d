use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum CodexError {
    #[error("Entity store error: {0}")]
    Store(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Invalid relation: {0}")]
    Relation(String),
    #[error("Field error: {0}")]
    Field(String),
    #[error("Entity creation failed: {0}")]
    Creation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl CodexError {
    /// Store failures are the only errors a reconciliation fan-out swallows; everything else
    /// points at a caller mistake.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CodexError::Store(_))
    }
}

impl From<toml::de::Error> for CodexError {
    fn from(src: toml::de::Error) -> CodexError {
        CodexError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for CodexError {
    fn from(src: toml::ser::Error) -> CodexError {
        CodexError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for CodexError {
    fn from(src: JsonError) -> CodexError {
        CodexError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for CodexError {
    fn from(src: uuid::Error) -> CodexError {
        CodexError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<io::Error> for CodexError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => CodexError::NotFound(format!("{x}")),
            _ => CodexError::Io(format!("IOError: {}", x.kind())),
        }
    }
}
