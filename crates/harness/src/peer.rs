use uuid::Uuid;

use docgraph_core::{BlockKind, BlockSpec, BlockType, IdGenerator, RecordId, SchemaUnit, Table, ViewSpec};
use docgraph_engine::{BlockMap, Created, Engine, EngineConfig, EngineError, ViewMap};

use crate::remote::{FakeRemote, SPACE_ID, USER_ID};

/// Deterministic ids: uuids counting up (or down) from a seed.
#[derive(Debug, Clone, Default)]
pub struct SequentialIds {
    next: u128,
    descending: bool,
}

impl SequentialIds {
    pub fn starting_at(next: u128) -> Self {
        Self { next, descending: false }
    }

    /// Each id sorts before the previous one.
    pub fn descending_from(next: u128) -> Self {
        Self { next, descending: true }
    }
}

impl IdGenerator for SequentialIds {
    fn new_id(&mut self) -> RecordId {
        self.next = if self.descending {
            self.next.saturating_sub(1)
        } else {
            self.next + 1
        };
        RecordId::from(Uuid::from_u128(self.next))
    }
}

/// A bootstrapped engine talking to a seeded fake service.
pub struct TestPeer {
    pub engine: Engine<FakeRemote>,
}

impl TestPeer {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_remote(FakeRemote::seeded())
    }

    pub fn with_remote(remote: FakeRemote) -> Result<Self, EngineError> {
        Self::with_ids(remote, SequentialIds::default())
    }

    pub fn with_ids(remote: FakeRemote, ids: SequentialIds) -> Result<Self, EngineError> {
        let config = EngineConfig {
            request_interval_ms: 0,
            ..EngineConfig::new(USER_ID, SPACE_ID)
        };
        let mut engine = Engine::with_id_generator(config, remote, Box::new(ids));
        engine.bootstrap()?;
        Ok(Self { engine })
    }

    pub fn space_id(&self) -> RecordId {
        RecordId::from(SPACE_ID)
    }

    pub fn server(&self) -> &FakeRemote {
        self.engine.remote()
    }

    pub fn server_mut(&mut self) -> &mut FakeRemote {
        self.engine.remote_mut()
    }

    /// Create one root page and return its id.
    pub fn create_page(&mut self, title: &str) -> Result<RecordId, EngineError> {
        let space = self.space_id();
        let created = self.engine.create_root_pages(&space, &[BlockSpec::page(title, Vec::new())])?;
        first_of(&created, BlockType::Page)
    }

    /// Create a `collection_view_page` at the root. Returns the block id, the
    /// collection id and the views by kind.
    pub fn create_database(
        &mut self,
        title: &str,
        schema: Vec<SchemaUnit>,
        views: Vec<ViewSpec>,
    ) -> Result<(RecordId, RecordId, ViewMap), EngineError> {
        let spec = BlockSpec::new(BlockKind::Collection {
            block_type: BlockType::CollectionViewPage,
            is_private: false,
            schema,
            views,
            rows: Vec::new(),
        })
        .titled(title);
        let space = self.space_id();
        let created = self.engine.create_root_pages(&space, &[spec])?;
        match created.get(&BlockType::CollectionViewPage).and_then(|list| list.first()) {
            Some(Created::Collection {
                block_id,
                collection_id,
                views,
            }) => Ok((block_id.clone(), collection_id.clone(), views.clone())),
            _ => Err(EngineError::not_found(Table::Block, title)),
        }
    }
}

/// Id of the first created entry of `block_type`.
pub fn first_of(created: &BlockMap, block_type: BlockType) -> Result<RecordId, EngineError> {
    created
        .get(&block_type)
        .and_then(|list| list.first())
        .map(|entry| entry.block_id().clone())
        .ok_or_else(|| EngineError::not_found(Table::Block, block_type.as_str()))
}
