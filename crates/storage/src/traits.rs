use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use docgraph_core::{
    ids::RecordId,
    operations::{Operation, Table},
    records::{Block, Collection, Record, User, UserRoot, View, Workspace, WorkspaceView},
};

use crate::error::StorageError;

/// One record as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub value: Value,
}

impl RecordEnvelope {
    pub fn editor(value: Value) -> Self {
        Self {
            role: "editor".into(),
            value,
        }
    }
}

/// Records grouped by table, as returned by reads and writes.
pub type RecordSubtree = BTreeMap<Table, BTreeMap<RecordId, RecordEnvelope>>;

/// A typed reference to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdRef {
    pub id: RecordId,
    pub table: Table,
}

impl IdRef {
    pub fn new(id: &RecordId, table: Table) -> Self {
        Self {
            id: id.clone(),
            table,
        }
    }
}

/// Bare ids refer to blocks.
impl From<RecordId> for IdRef {
    fn from(id: RecordId) -> Self {
        Self {
            id,
            table: Table::Block,
        }
    }
}

impl From<(RecordId, Table)> for IdRef {
    fn from((id, table): (RecordId, Table)) -> Self {
        Self { id, table }
    }
}

/// Typed cache of every record kind, keyed by id.
pub trait RecordStore {
    fn get(&self, table: Table, id: &RecordId) -> Option<&Record>;

    fn get_mut(&mut self, table: Table, id: &RecordId) -> Option<&mut Record>;

    /// Insert or replace a record.
    fn insert(&mut self, record: Record);

    fn remove(&mut self, table: Table, id: &RecordId) -> Option<Record>;

    /// Ids stored for `table`, in no particular order.
    fn ids(&self, table: Table) -> Vec<RecordId>;

    /// Merge a remote subtree. Dead records are dropped instead of stored.
    /// Returns the number of live records written.
    fn ingest(&mut self, subtree: &RecordSubtree) -> Result<usize, StorageError>;

    /// Materialize one operation against the local records.
    fn apply(&mut self, op: &Operation) -> Result<(), StorageError>;

    fn contains(&self, table: Table, id: &RecordId) -> bool {
        self.get(table, id).is_some()
    }

    /// True if any table holds `id`.
    fn contains_any(&self, id: &RecordId) -> bool {
        Table::ALL.iter().any(|table| self.contains(*table, id))
    }

    fn len(&self, table: Table) -> usize {
        self.ids(table).len()
    }

    fn require(&self, table: Table, id: &RecordId) -> Result<&Record, StorageError> {
        self.get(table, id).ok_or_else(|| StorageError::NotFound {
            table,
            id: id.to_string(),
        })
    }

    fn block(&self, id: &RecordId) -> Option<&Block> {
        match self.get(Table::Block, id) {
            Some(Record::Block(block)) => Some(block),
            _ => None,
        }
    }

    fn collection(&self, id: &RecordId) -> Option<&Collection> {
        match self.get(Table::Collection, id) {
            Some(Record::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    fn view(&self, id: &RecordId) -> Option<&View> {
        match self.get(Table::CollectionView, id) {
            Some(Record::View(view)) => Some(view),
            _ => None,
        }
    }

    fn workspace(&self, id: &RecordId) -> Option<&Workspace> {
        match self.get(Table::Workspace, id) {
            Some(Record::Workspace(workspace)) => Some(workspace),
            _ => None,
        }
    }

    fn workspace_view(&self, id: &RecordId) -> Option<&WorkspaceView> {
        match self.get(Table::WorkspaceView, id) {
            Some(Record::WorkspaceView(view)) => Some(view),
            _ => None,
        }
    }

    fn user(&self, id: &RecordId) -> Option<&User> {
        match self.get(Table::User, id) {
            Some(Record::User(user)) => Some(user),
            _ => None,
        }
    }

    fn user_root(&self, id: &RecordId) -> Option<&UserRoot> {
        match self.get(Table::UserRoot, id) {
            Some(Record::UserRoot(root)) => Some(root),
            _ => None,
        }
    }
}
