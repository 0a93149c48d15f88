use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("collection {collection_id} does not contain a column named {column:?}")]
    UnknownColumn { collection_id: String, column: String },

    #[error("collection {collection_id} already has a column with key {key:?}")]
    DuplicateSchemaKey { collection_id: String, key: String },

    #[error("sibling {sibling} is not in {field} of {owner}")]
    SiblingNotFound {
        owner: String,
        field: &'static str,
        sibling: String,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl CoreError {
    /// True for compile-time invariant violations in caller input.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidContent(_)
                | Self::UnknownColumn { .. }
                | Self::DuplicateSchemaKey { .. }
                | Self::SiblingNotFound { .. }
        )
    }
}
