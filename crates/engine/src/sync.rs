//! Cache synchronizer: fill the record store from the bulk reader.

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use docgraph_storage::{IdRef, RecordStore};

use crate::error::EngineError;
use crate::remote::{BulkReader, FetchRequest};

/// Fixed delay before a remote call. Zero skips it.
pub(crate) fn pause(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}

/// Refs not in `store`, first occurrence order, duplicates dropped.
pub fn missing_refs(store: &impl RecordStore, refs: &[IdRef]) -> Vec<IdRef> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| !store.contains(r.table, &r.id))
        .filter(|r| seen.insert((*r).clone()))
        .cloned()
        .collect()
}

/// Fetch the refs missing from `store` in one batch and merge them in.
/// Returns how many refs were requested.
pub fn ensure_present(
    store: &mut impl RecordStore,
    reader: &mut impl BulkReader,
    refs: &[IdRef],
    interval: Duration,
) -> Result<usize, EngineError> {
    let missing = missing_refs(store, refs);
    fetch(store, reader, &missing, interval)?;
    Ok(missing.len())
}

/// Fetch every ref regardless of presence, picking up server-computed fields.
pub fn force_refresh(
    store: &mut impl RecordStore,
    reader: &mut impl BulkReader,
    refs: &[IdRef],
    interval: Duration,
) -> Result<usize, EngineError> {
    let mut seen = HashSet::new();
    let unique: Vec<IdRef> = refs.iter().filter(|r| seen.insert((*r).clone())).cloned().collect();
    fetch(store, reader, &unique, interval)?;
    Ok(unique.len())
}

fn fetch(
    store: &mut impl RecordStore,
    reader: &mut impl BulkReader,
    refs: &[IdRef],
    interval: Duration,
) -> Result<(), EngineError> {
    if refs.is_empty() {
        return Ok(());
    }
    let requests: Vec<FetchRequest> = refs.iter().map(FetchRequest::from).collect();
    debug!(refs = requests.len(), "fetching records");
    pause(interval);
    let subtree = reader.fetch_by_refs(&requests)?;
    store.ingest(&subtree)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::{RecordId, Table};
    use docgraph_storage::{MemoryStore, RecordEnvelope, RecordSubtree};
    use serde_json::json;

    use crate::error::TransportError;

    #[derive(Default)]
    struct CountingReader {
        calls: usize,
        requested: Vec<FetchRequest>,
    }

    impl BulkReader for CountingReader {
        fn fetch_by_refs(&mut self, refs: &[FetchRequest]) -> Result<RecordSubtree, TransportError> {
            self.calls += 1;
            self.requested.extend_from_slice(refs);
            let mut subtree = RecordSubtree::new();
            for r in refs {
                subtree.entry(r.table).or_default().insert(
                    r.id.clone(),
                    RecordEnvelope::editor(json!({ "id": r.id, "type": "page" })),
                );
            }
            Ok(subtree)
        }

        fn load_user_content(&mut self) -> Result<RecordSubtree, TransportError> {
            Ok(RecordSubtree::new())
        }
    }

    fn refs(ids: &[&str]) -> Vec<IdRef> {
        ids.iter().map(|id| IdRef::from(RecordId::from(*id))).collect()
    }

    #[test]
    fn second_fill_only_fetches_new_ids() {
        let mut store = MemoryStore::new();
        let mut reader = CountingReader::default();

        let fetched = ensure_present(&mut store, &mut reader, &refs(&["a", "b", "a"]), Duration::ZERO).unwrap();
        assert_eq!(fetched, 2);
        assert_eq!(reader.calls, 1);

        let fetched = ensure_present(&mut store, &mut reader, &refs(&["a", "b", "c"]), Duration::ZERO).unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(reader.calls, 2);
        assert_eq!(reader.requested.last().map(|r| r.id.as_str()), Some("c"));

        ensure_present(&mut store, &mut reader, &refs(&["c"]), Duration::ZERO).unwrap();
        assert_eq!(reader.calls, 2);
    }

    #[test]
    fn refresh_always_fetches_once_per_id() {
        let mut store = MemoryStore::new();
        let mut reader = CountingReader::default();
        ensure_present(&mut store, &mut reader, &refs(&["a"]), Duration::ZERO).unwrap();

        let fetched = force_refresh(&mut store, &mut reader, &refs(&["a", "a"]), Duration::ZERO).unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(reader.calls, 2);
        assert!(reader.requested.iter().all(|r| r.version == 0 && r.table == Table::Block));
    }
}
