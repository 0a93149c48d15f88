use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::error::CoreError;
use crate::ids::*;

/// Remote table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Block,
    Collection,
    CollectionView,
    #[serde(rename = "space")]
    Workspace,
    #[serde(rename = "space_view")]
    WorkspaceView,
    #[serde(rename = "notion_user")]
    User,
    UserSettings,
    UserRoot,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Block,
        Table::Collection,
        Table::CollectionView,
        Table::Workspace,
        Table::WorkspaceView,
        Table::User,
        Table::UserSettings,
        Table::UserRoot,
    ];

    /// Wire name of the table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Collection => "collection",
            Self::CollectionView => "collection_view",
            Self::Workspace => "space",
            Self::WorkspaceView => "space_view",
            Self::User => "notion_user",
            Self::UserSettings => "user_settings",
            Self::UserRoot => "user_root",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Serialization(format!("unknown table: {s}")))
    }

    pub fn set(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::Set, id, path, args)
    }

    pub fn update(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::Update, id, path, args)
    }

    pub fn list_before(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::ListBefore, id, path, args)
    }

    pub fn list_after(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::ListAfter, id, path, args)
    }

    pub fn list_remove(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::ListRemove, id, path, args)
    }

    pub fn set_permission_item(self, id: &RecordId, path: &[&str], args: Value) -> Operation {
        Operation::new(self, Command::SetPermissionItem, id, path, args)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Replace the value at `path`.
    Set,
    /// Merge the fields of `args` into the object at `path`.
    Update,
    ListBefore,
    ListAfter,
    ListRemove,
    /// Upsert a permission entry keyed by (type, user_id).
    SetPermissionItem,
}

impl Command {
    pub fn is_list_insert(&self) -> bool {
        matches!(self, Self::ListBefore | Self::ListAfter)
    }
}

/// One field-level mutation against one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub table: Table,
    pub id: RecordId,
    pub path: Vec<String>,
    pub command: Command,
    pub args: Value,
}

impl Operation {
    pub fn new(table: Table, command: Command, id: &RecordId, path: &[&str], args: Value) -> Self {
        Self {
            table,
            id: id.clone(),
            path: path.iter().map(|p| p.to_string()).collect(),
            command,
            args,
        }
    }

    /// True when this operation writes a whole record at the root path.
    pub fn is_record_write(&self) -> bool {
        self.path.is_empty() && matches!(self.command, Command::Set | Command::Update)
    }

    /// The `type` field carried by a whole-record write, if any.
    pub fn record_type(&self) -> Option<&str> {
        if !self.is_record_write() {
            return None;
        }
        self.args.get("type").and_then(Value::as_str)
    }
}

/// Shapes operations for one (table, command) pair.
///
/// Pure: ids inside `args` are supplied by the caller.
pub fn make_op(
    table: Table,
    command: Command,
) -> impl Fn(&RecordId, &[&str], Value) -> Operation {
    move |id, path, args| Operation::new(table, command, id, path, args)
}

/// `listAfter` anchored at the end-of-list sentinel.
pub fn append_op(table: Table, owner: &RecordId, field: &str, child: &RecordId) -> Operation {
    table.list_after(owner, &[field], json!({ "after": "", "id": child }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub shard_id: u64,
    pub space_id: RecordId,
    pub operations: Vec<Operation>,
}

/// Body of one write request. The remote applies every transaction
/// atomically and in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub request_id: RequestId,
    pub transactions: Vec<Transaction>,
}

impl TransactionRequest {
    pub fn single(shard_id: u64, space_id: &RecordId, operations: Vec<Operation>) -> Self {
        Self {
            request_id: RequestId::new(),
            transactions: vec![Transaction {
                id: TransactionId::new(),
                shard_id,
                space_id: space_id.clone(),
                operations,
            }],
        }
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.transactions.iter().flat_map(|t| t.operations.iter())
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
