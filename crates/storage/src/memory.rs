use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use docgraph_core::{
    ids::RecordId,
    operations::{Operation, Table},
    records::Record,
};

use crate::apply::materialize_op;
use crate::error::StorageError;
use crate::traits::{RecordStore, RecordSubtree};

/// In-process record cache. Deleted records are dropped, never tombstoned.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: BTreeMap<Table, HashMap<RecordId, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all tables.
    pub fn total(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    /// Every record of `table`.
    pub fn records(&self, table: Table) -> impl Iterator<Item = &Record> {
        self.tables.get(&table).into_iter().flat_map(|records| records.values())
    }

    /// The whole cache in wire shape.
    pub fn to_subtree(&self) -> Result<RecordSubtree, StorageError> {
        let mut subtree = RecordSubtree::new();
        for (table, records) in &self.tables {
            let entries = subtree.entry(*table).or_default();
            for (id, record) in records {
                entries.insert(id.clone(), crate::RecordEnvelope::editor(record.to_value()?));
            }
        }
        Ok(subtree)
    }
}

fn is_dead(value: &Value) -> bool {
    value.get("alive").and_then(Value::as_bool) == Some(false)
}

impl RecordStore for MemoryStore {
    fn get(&self, table: Table, id: &RecordId) -> Option<&Record> {
        self.tables.get(&table)?.get(id)
    }

    fn get_mut(&mut self, table: Table, id: &RecordId) -> Option<&mut Record> {
        self.tables.get_mut(&table)?.get_mut(id)
    }

    fn insert(&mut self, record: Record) {
        self.tables
            .entry(record.table())
            .or_default()
            .insert(record.id().clone(), record);
    }

    fn remove(&mut self, table: Table, id: &RecordId) -> Option<Record> {
        self.tables.get_mut(&table)?.remove(id)
    }

    fn ids(&self, table: Table) -> Vec<RecordId> {
        self.tables
            .get(&table)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, HashMap::len)
    }

    fn ingest(&mut self, subtree: &RecordSubtree) -> Result<usize, StorageError> {
        let mut written = 0;
        for (table, entries) in subtree {
            for (id, envelope) in entries {
                // Records the caller may not read come back without a value.
                if !envelope.value.is_object() {
                    continue;
                }
                if is_dead(&envelope.value) {
                    self.remove(*table, id);
                    continue;
                }
                let record = Record::from_value(*table, envelope.value.clone())?;
                self.insert(record);
                written += 1;
            }
        }
        debug!(written, "ingested record subtree");
        Ok(written)
    }

    fn apply(&mut self, op: &Operation) -> Result<(), StorageError> {
        let current = self
            .get(op.table, &op.id)
            .map(Record::to_value)
            .transpose()?;
        let next = materialize_op(current, op)?;
        if is_dead(&next) {
            self.remove(op.table, &op.id);
            return Ok(());
        }
        let record = Record::from_value(op.table, next)?;
        self.insert(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RecordEnvelope;
    use serde_json::json;

    fn subtree(table: Table, values: Vec<Value>) -> RecordSubtree {
        let mut subtree = RecordSubtree::new();
        let entries = subtree.entry(table).or_default();
        for value in values {
            let id = RecordId::from(value["id"].as_str().unwrap());
            entries.insert(id, RecordEnvelope::editor(value));
        }
        subtree
    }

    #[test]
    fn ingest_stores_live_and_drops_dead() {
        let mut store = MemoryStore::new();
        store
            .ingest(&subtree(Table::Block, vec![
                json!({ "id": "a", "type": "page" }),
                json!({ "id": "b", "type": "text" }),
            ]))
            .unwrap();
        assert_eq!(store.len(Table::Block), 2);

        let written = store
            .ingest(&subtree(Table::Block, vec![json!({ "id": "a", "type": "page", "alive": false })]))
            .unwrap();
        assert_eq!(written, 0);
        assert!(!store.contains(Table::Block, &"a".into()));
        assert!(store.block(&"b".into()).is_some());
    }

    #[test]
    fn ingest_skips_unreadable_records() {
        let mut store = MemoryStore::new();
        let mut tree = RecordSubtree::new();
        tree.entry(Table::Block).or_default().insert(
            "hidden".into(),
            RecordEnvelope { role: "none".into(), value: Value::Null },
        );
        assert_eq!(store.ingest(&tree).unwrap(), 0);
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn apply_creates_mutates_and_deletes() {
        let mut store = MemoryStore::new();
        let id = RecordId::from("p");
        store
            .apply(&Table::Block.update(&id, &[], json!({ "type": "page", "parent_id": "s", "parent_table": "space" })))
            .unwrap();
        store
            .apply(&Table::Block.list_after(&id, &["content"], json!({ "after": "", "id": "c1" })))
            .unwrap();
        assert_eq!(store.block(&id).unwrap().content, vec![RecordId::from("c1")]);
        assert_eq!(store.block(&id).unwrap().parent_table, Table::Workspace);

        store.apply(&Table::Block.update(&id, &[], json!({ "alive": false }))).unwrap();
        assert!(store.block(&id).is_none());
        assert!(!store.contains_any(&id));
    }

    #[test]
    fn wire_shape_round_trips() {
        let mut store = MemoryStore::new();
        store
            .ingest(&subtree(Table::Workspace, vec![json!({ "id": "s", "name": "Home", "pages": ["p"] })]))
            .unwrap();
        let mut copy = MemoryStore::new();
        copy.ingest(&store.to_subtree().unwrap()).unwrap();
        assert_eq!(copy.workspace(&"s".into()).unwrap().pages, vec![RecordId::from("p")]);
    }
}
