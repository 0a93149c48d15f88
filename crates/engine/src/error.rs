use docgraph_core::{CoreError, Table};
use docgraph_storage::StorageError;
use thiserror::Error;

/// Failure reported by a remote collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{table} record not found: {id}")]
    RecordNotFound { table: Table, id: String },

    #[error("{child} is not a child of {parent}")]
    NotParent { parent: String, child: String },

    #[error("no external drive account is connected")]
    NoDriveAccount,
}

/// Coarse classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A record is missing and could not be fetched.
    Reference,
    /// Caller input violates a structural invariant.
    Structural,
    /// A remote call failed.
    Transport,
    Internal,
}

impl EngineError {
    pub fn not_found(table: Table, id: impl ToString) -> Self {
        Self::RecordNotFound {
            table,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecordNotFound { .. } | Self::NoDriveAccount => ErrorKind::Reference,
            Self::Storage(StorageError::NotFound { .. }) => ErrorKind::Reference,
            Self::NotParent { .. } => ErrorKind::Structural,
            Self::Core(e) if e.is_structural() => ErrorKind::Structural,
            Self::Storage(StorageError::Core(e)) if e.is_structural() => ErrorKind::Structural,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Storage(_) | Self::Core(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let err = EngineError::from(CoreError::UnknownColumn {
            collection_id: "c".into(),
            column: "Missing".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(EngineError::not_found(Table::Block, "b").kind(), ErrorKind::Reference);
        assert_eq!(
            EngineError::from(TransportError::Unavailable("down".into())).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            EngineError::from(CoreError::Serialization("x".into())).kind(),
            ErrorKind::Internal
        );
    }
}
