use crate::core::entity::{EntityId, FileId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity '{0}' already exists")]
    DuplicateId(EntityId),

    #[error("Entity '{entity}' references missing entity '{missing}'")]
    ReferentialIntegrity { entity: EntityId, missing: EntityId },

    #[error("Snapshot version moved under the update")]
    StaleVersion,

    #[error("Parse error in '{file}': {message}")]
    Parse { file: FileId, message: String },

    #[error("Render error for '{file}': {message}")]
    Render { file: FileId, message: String },

    #[error("I/O error on '{file}': {message}")]
    Io { file: FileId, message: String },

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
