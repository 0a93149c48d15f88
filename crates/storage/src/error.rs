use thiserror::Error;

use docgraph_core::Table;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{table} record not found: {id}")]
    NotFound { table: Table, id: String },

    #[error("cannot apply {command} at {path:?} on {table} {id}: {reason}")]
    InvalidOperation {
        table: Table,
        id: String,
        command: String,
        path: Vec<String>,
        reason: String,
    },

    #[error("core error: {0}")]
    Core(#[from] docgraph_core::CoreError),
}
