use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use docgraph_core::{BlockType, Operation, Record, RecordId, Table, TransactionRequest};
use docgraph_engine::{BulkReader, DriveAccount, FetchRequest, MetadataResolver, TransactionSender, TransportError};
use docgraph_storage::{RecordEnvelope, RecordSubtree, apply::materialize_op};

pub const USER_ID: &str = "user-1";
pub const SPACE_ID: &str = "space-1";
pub const SPACE_VIEW_ID: &str = "space-view-1";

/// Authoritative record state behind a test engine.
///
/// Transactions are applied atomically: a rejected operation leaves the
/// state untouched. Dead records are kept, as the real service does.
#[derive(Debug, Default)]
pub struct FakeRemote {
    records: BTreeMap<Table, BTreeMap<RecordId, Value>>,
    pub sent: Vec<TransactionRequest>,
    pub fetches: Vec<Vec<FetchRequest>>,
    pub bookmarks: Vec<(RecordId, String)>,
    pub drive_accounts: Vec<DriveAccount>,
    failing_sends: usize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// One user with one empty workspace.
    pub fn seeded() -> Self {
        let mut remote = Self::new();
        remote.insert(
            Table::User,
            json!({ "id": USER_ID, "email": "user@example.com", "given_name": "Test" }),
        );
        remote.insert(Table::UserRoot, json!({ "id": USER_ID, "space_views": [SPACE_VIEW_ID] }));
        remote.insert(Table::UserSettings, json!({ "id": USER_ID, "settings": {} }));
        remote.insert(
            Table::Workspace,
            json!({
                "id": SPACE_ID,
                "name": "Workspace",
                "pages": [],
                "permissions": [{ "type": "user_permission", "role": "editor", "user_id": USER_ID }],
            }),
        );
        remote.insert(
            Table::WorkspaceView,
            json!({
                "id": SPACE_VIEW_ID,
                "parent_id": USER_ID,
                "parent_table": "user_root",
                "space_id": SPACE_ID,
                "bookmarked_pages": [],
            }),
        );
        remote
    }

    /// Put a record in place as if another client had written it.
    pub fn insert(&mut self, table: Table, mut value: Value) {
        let id = RecordId::from(value["id"].as_str().unwrap_or_default());
        if let Value::Object(map) = &mut value {
            map.entry("version").or_insert(json!(1));
        }
        self.records.entry(table).or_default().insert(id, value);
    }

    pub fn raw(&self, table: Table, id: &RecordId) -> Option<&Value> {
        self.records.get(&table)?.get(id)
    }

    /// Typed copy of a stored record, dead or alive.
    pub fn get(&self, table: Table, id: &RecordId) -> Option<Record> {
        let value = self.raw(table, id)?.clone();
        Record::from_value(table, value).ok()
    }

    pub fn content_of(&self, table: Table, id: &RecordId, field: &str) -> Vec<RecordId> {
        self.raw(table, id)
            .and_then(|value| value.get(field).cloned())
            .and_then(|list| serde_json::from_value(list).ok())
            .unwrap_or_default()
    }

    pub fn is_alive(&self, table: Table, id: &RecordId) -> bool {
        self.raw(table, id)
            .is_some_and(|value| value.get("alive").and_then(Value::as_bool) != Some(false))
    }

    /// Make the next `count` sends fail before anything is applied.
    pub fn fail_next_sends(&mut self, count: usize) {
        self.failing_sends = count;
    }

    pub fn transactions(&self) -> usize {
        self.sent.len()
    }

    /// Operations of the most recent transaction.
    pub fn last_operations(&self) -> Vec<Operation> {
        self.sent
            .last()
            .map(|request| request.operations().cloned().collect())
            .unwrap_or_default()
    }

    /// Total refs requested across every fetch.
    pub fn fetched_refs(&self) -> usize {
        self.fetches.iter().map(Vec::len).sum()
    }

    fn subtree<'a>(&self, refs: impl IntoIterator<Item = (Table, &'a RecordId)>) -> RecordSubtree {
        let mut subtree = RecordSubtree::new();
        for (table, id) in refs {
            if let Some(value) = self.raw(table, id) {
                subtree
                    .entry(table)
                    .or_default()
                    .insert(id.clone(), RecordEnvelope::editor(value.clone()));
            }
        }
        subtree
    }
}

fn bump_version(value: &mut Value) {
    if let Value::Object(map) = value {
        let next = map.get("version").and_then(Value::as_u64).unwrap_or(0) + 1;
        map.insert("version".into(), json!(next));
    }
}

impl TransactionSender for FakeRemote {
    fn send(&mut self, request: &TransactionRequest) -> Result<RecordSubtree, TransportError> {
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            return Err(TransportError::Unavailable("injected failure".into()));
        }

        let mut staged = self.records.clone();
        let mut touched = BTreeSet::new();
        for op in request.operations() {
            let current = staged.get(&op.table).and_then(|records| records.get(&op.id)).cloned();
            let next = materialize_op(current, op).map_err(|e| TransportError::Rejected(e.to_string()))?;
            staged.entry(op.table).or_default().insert(op.id.clone(), next);
            touched.insert((op.table, op.id.clone()));
        }
        for (table, id) in &touched {
            if let Some(value) = staged.get_mut(table).and_then(|records| records.get_mut(id)) {
                bump_version(value);
            }
        }

        self.records = staged;
        self.sent.push(request.clone());
        Ok(self.subtree(touched.iter().map(|(table, id)| (*table, id))))
    }
}

impl BulkReader for FakeRemote {
    fn fetch_by_refs(&mut self, refs: &[FetchRequest]) -> Result<RecordSubtree, TransportError> {
        self.fetches.push(refs.to_vec());
        Ok(self.subtree(refs.iter().map(|r| (r.table, &r.id))))
    }

    fn load_user_content(&mut self) -> Result<RecordSubtree, TransportError> {
        let user = RecordId::from(USER_ID);
        let mut refs = vec![(Table::User, user.clone()), (Table::UserRoot, user.clone()), (Table::UserSettings, user)];
        for table in [Table::Workspace, Table::WorkspaceView] {
            if let Some(records) = self.records.get(&table) {
                refs.extend(records.keys().map(|id| (table, id.clone())));
            }
        }
        Ok(self.subtree(refs.iter().map(|(table, id)| (*table, id))))
    }
}

impl MetadataResolver for FakeRemote {
    fn resolve_embed_metadata(
        &mut self,
        source: &str,
        provider: BlockType,
        page_width: u32,
    ) -> Result<Map<String, Value>, TransportError> {
        let mut format = Map::new();
        format.insert("display_source".into(), json!(source));
        format.insert("block_width".into(), json!(page_width));
        format.insert("block_preserve_scale".into(), json!(true));
        format.insert("provider".into(), json!(provider));
        Ok(format)
    }

    fn register_bookmark_metadata(&mut self, block_id: &RecordId, url: &str) -> Result<(), TransportError> {
        self.bookmarks.push((block_id.clone(), url.to_string()));
        Ok(())
    }

    fn drive_accounts(&mut self) -> Result<Vec<DriveAccount>, TransportError> {
        Ok(self.drive_accounts.clone())
    }

    fn resolve_external_file_handle(
        &mut self,
        block_id: &RecordId,
        file_id: &str,
        token: &str,
    ) -> Result<Value, TransportError> {
        if token.is_empty() {
            return Err(TransportError::Rejected(format!("no token for {block_id}")));
        }
        Ok(json!({ "file_id": file_id, "trashed": false }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_transaction_changes_nothing() {
        let mut remote = FakeRemote::seeded();
        let space = RecordId::from(SPACE_ID);
        let page = RecordId::from("p1");
        let request = TransactionRequest::single(
            0,
            &space,
            vec![
                Table::Block.set(&page, &[], json!({ "id": "p1", "type": "page" })),
                Table::Block.list_after(&"missing".into(), &["content"], json!({ "after": "", "id": "p1" })),
            ],
        );
        assert!(matches!(remote.send(&request), Err(TransportError::Rejected(_))));
        assert!(remote.raw(Table::Block, &page).is_none());
        assert_eq!(remote.transactions(), 0);
    }

    #[test]
    fn accepted_transaction_bumps_each_record_once() {
        let mut remote = FakeRemote::seeded();
        let space = RecordId::from(SPACE_ID);
        let page = RecordId::from("p1");
        let request = TransactionRequest::single(
            0,
            &space,
            vec![
                Table::Block.set(&page, &[], json!({ "id": "p1", "type": "page", "version": 0 })),
                Table::Block.set(&page, &["last_edited_time"], json!(5)),
                Table::Workspace.list_after(&space, &["pages"], json!({ "after": "", "id": "p1" })),
            ],
        );
        let response = remote.send(&request).unwrap();
        assert_eq!(response[&Table::Block][&page].value["version"], json!(1));
        assert_eq!(response[&Table::Workspace][&space].value["version"], json!(2));
        assert_eq!(remote.content_of(Table::Workspace, &space, "pages"), vec![page]);
    }
}
