//! Boundaries to the remote document service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docgraph_core::{BlockType, RecordId, Table, TransactionRequest};
use docgraph_storage::{IdRef, RecordSubtree};

use crate::error::TransportError;

/// One record to fetch. Version 0 asks for the latest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub id: RecordId,
    pub table: Table,
    pub version: u64,
}

impl From<&IdRef> for FetchRequest {
    fn from(r: &IdRef) -> Self {
        Self {
            id: r.id.clone(),
            table: r.table,
            version: 0,
        }
    }
}

/// The only write path. Transactions are applied in the order submitted.
pub trait TransactionSender {
    fn send(&mut self, request: &TransactionRequest) -> Result<RecordSubtree, TransportError>;
}

pub trait BulkReader {
    fn fetch_by_refs(&mut self, refs: &[FetchRequest]) -> Result<RecordSubtree, TransportError>;

    /// Everything the acting user can see at the top level: user records,
    /// workspaces and their per-user views.
    fn load_user_content(&mut self) -> Result<RecordSubtree, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveAccount {
    pub account_id: String,
    pub token: String,
}

/// Side-channel lookups some block kinds need before they are created.
pub trait MetadataResolver {
    /// Provider-specific render data for an embed; merged into the block's
    /// `format`.
    fn resolve_embed_metadata(
        &mut self,
        source: &str,
        provider: BlockType,
        page_width: u32,
    ) -> Result<Map<String, Value>, TransportError>;

    fn register_bookmark_metadata(&mut self, block_id: &RecordId, url: &str) -> Result<(), TransportError>;

    fn drive_accounts(&mut self) -> Result<Vec<DriveAccount>, TransportError>;

    fn resolve_external_file_handle(
        &mut self,
        block_id: &RecordId,
        file_id: &str,
        token: &str,
    ) -> Result<Value, TransportError>;
}

/// Everything the engine talks to.
pub trait Remote: TransactionSender + BulkReader + MetadataResolver {}

impl<T: TransactionSender + BulkReader + MetadataResolver> Remote for T {}
