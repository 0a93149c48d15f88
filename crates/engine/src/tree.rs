//! Tree compiler: nested content specs into an ordered create-operation list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::debug;

use docgraph_core::{
    BlockKind, BlockSpec, BlockType, ChildField, ChildSlot, CoreError, EditClock, IdGenerator, LeafSpec,
    Operation, Permission, Position, RecordId, Schema, Table, ViewKind, ViewSpec,
    children::insert_into,
    records::{PermissionRole, PermissionType},
};
use docgraph_storage::{IdRef, RecordStore};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::remote::MetadataResolver;
use crate::sync::pause;
use crate::views::{CompiledViews, ViewCompiler};

pub(crate) const MAX_ID_ATTEMPTS: usize = 16;

/// Views of one collection block, grouped by kind.
pub type ViewMap = BTreeMap<ViewKind, Vec<RecordId>>;

/// Blocks grouped by type. Nested pages and rows are listed alongside their
/// ancestors; only factory children stay nested.
pub type BlockMap = BTreeMap<BlockType, Vec<Created>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    Block(RecordId),
    Collection {
        block_id: RecordId,
        collection_id: RecordId,
        views: ViewMap,
    },
    Factory {
        block_id: RecordId,
        contents: BlockMap,
    },
}

impl Created {
    pub fn block_id(&self) -> &RecordId {
        match self {
            Self::Block(id) => id,
            Self::Collection { block_id, .. } | Self::Factory { block_id, .. } => block_id,
        }
    }
}

/// Number of entries per block type.
pub fn block_counts(map: &BlockMap) -> BTreeMap<BlockType, usize> {
    map.iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(block_type, entries)| (*block_type, entries.len()))
        .collect()
}

pub fn view_map(views: &[(RecordId, ViewKind)]) -> ViewMap {
    let mut map = ViewMap::new();
    for (id, kind) in views {
        map.entry(*kind).or_default().push(id.clone());
    }
    map
}

/// Where compiled blocks are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    /// `content` of a page or other block.
    Block(RecordId),
    /// Root `pages` of a workspace.
    Workspace(RecordId),
    /// Rows of a collection; rows are not listed in any array.
    Rows(RecordId),
    /// `template_pages` of a collection.
    Templates(RecordId),
}

impl Parent {
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Block(id) | Self::Workspace(id) | Self::Rows(id) | Self::Templates(id) => id,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Self::Block(_) => Table::Block,
            Self::Workspace(_) => Table::Workspace,
            Self::Rows(_) | Self::Templates(_) => Table::Collection,
        }
    }

    pub fn slot(&self) -> Option<ChildSlot> {
        let field = match self {
            Self::Block(_) => ChildField::Content,
            Self::Workspace(_) => ChildField::Pages,
            Self::Templates(_) => ChildField::TemplatePages,
            Self::Rows(_) => return None,
        };
        Some(ChildSlot::new(self.table(), self.id(), field))
    }
}

/// Result of one compile.
#[derive(Debug, Default)]
pub struct CompiledTree {
    pub ops: Vec<Operation>,
    /// Records to confirm fresh once the transaction lands.
    pub touch_list: Vec<IdRef>,
    pub created: BlockMap,
}

pub struct TreeCompiler<'a> {
    store: &'a dyn RecordStore,
    resolver: &'a mut dyn MetadataResolver,
    ids: &'a mut dyn IdGenerator,
    config: &'a EngineConfig,
    clock: &'a mut EditClock,
    issued: HashSet<RecordId>,
    containers: HashMap<ChildSlot, Vec<RecordId>>,
    out: CompiledTree,
}

impl<'a> TreeCompiler<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        resolver: &'a mut dyn MetadataResolver,
        ids: &'a mut dyn IdGenerator,
        config: &'a EngineConfig,
        clock: &'a mut EditClock,
    ) -> Self {
        Self {
            store,
            resolver,
            ids,
            config,
            clock,
            issued: HashSet::new(),
            containers: HashMap::new(),
            out: CompiledTree::default(),
        }
    }

    pub fn finish(self) -> CompiledTree {
        self.out
    }

    /// A fresh id that is neither cached nor issued earlier in this compile.
    pub fn fresh_id(&mut self) -> Result<RecordId, CoreError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.new_id();
            if !self.store.contains_any(&id) && self.issued.insert(id.clone()) {
                return Ok(id);
            }
        }
        Err(CoreError::InvalidData("id generator keeps returning used ids".into()))
    }

    /// Compile `specs` in order as children of `parent`.
    pub fn compile(&mut self, specs: &[BlockSpec], parent: &Parent) -> Result<(), EngineError> {
        let mut created = BlockMap::new();
        self.compile_into(specs, parent, &mut created)?;
        for (block_type, entries) in created {
            self.out.created.entry(block_type).or_default().extend(entries);
        }
        Ok(())
    }

    fn compile_into(
        &mut self,
        specs: &[BlockSpec],
        parent: &Parent,
        created: &mut BlockMap,
    ) -> Result<(), EngineError> {
        for spec in specs {
            let listed = match &spec.kind {
                BlockKind::LinkToPage { page_id } => page_id.clone(),
                _ => {
                    let id = self.fresh_id()?;
                    self.out.touch_list.push(IdRef::from(id.clone()));
                    self.compile_block(&id, spec, parent, created)?;
                    id
                }
            };
            self.list_in_parent(parent, &listed, spec.position.as_ref())?;
        }
        Ok(())
    }

    fn compile_block(
        &mut self,
        id: &RecordId,
        spec: &BlockSpec,
        parent: &Parent,
        created: &mut BlockMap,
    ) -> Result<(), EngineError> {
        let block_type = spec.block_type();
        debug!(block = %id, kind = %block_type.as_str(), parent = %parent.id(), "compiling block");

        match &spec.kind {
            BlockKind::Page { is_private, contents } => {
                let mut args = self.block_args(id, block_type, spec, parent);
                args.insert("permissions".into(), self.default_permissions(*is_private)?);
                if matches!(parent, Parent::Templates(_)) {
                    args.insert("is_template".into(), json!(true));
                }
                self.push(Table::Block.update(id, &[], Value::Object(args)));
                created.entry(block_type).or_default().push(Created::Block(id.clone()));
                self.compile_into(contents, &Parent::Block(id.clone()), created)?;
            }
            BlockKind::Collection {
                is_private,
                schema,
                views,
                rows,
                ..
            } => {
                let collection_id = self.fresh_id()?;
                let schema = Schema::from_units(collection_id.as_str(), schema)?;
                let compiled = self.compile_views(&schema, views, &collection_id, id)?;

                let mut args = self.block_args(id, block_type, spec, parent);
                args.insert("collection_id".into(), json!(collection_id));
                args.insert("view_ids".into(), json!(compiled.view_ids()));
                if block_type == BlockType::CollectionViewPage {
                    args.insert("permissions".into(), self.default_permissions(*is_private)?);
                }
                self.push(Table::Block.update(id, &[], Value::Object(args)));
                self.push(Table::Collection.update(
                    &collection_id,
                    &[],
                    json!({
                        "id": collection_id,
                        "schema": schema,
                        "format": { "collection_page_properties": [] },
                        "icon": spec.format.get("page_icon").cloned().unwrap_or_else(|| json!("")),
                        "parent_id": id,
                        "parent_table": "block",
                        "alive": true,
                        "name": spec.properties.get("title").cloned().unwrap_or_else(|| json!([])),
                    }),
                ));
                self.attach_views(&collection_id, compiled, block_type, id, created);
                self.compile_into(rows, &Parent::Rows(collection_id), created)?;
            }
            BlockKind::LinkedDatabase { collection_id, views } => {
                let store = self.store;
                let collection = store
                    .collection(collection_id)
                    .ok_or_else(|| EngineError::not_found(Table::Collection, collection_id))?;
                let compiled = self.compile_views(&collection.schema, views, collection_id, id)?;
                self.push(Table::Block.set(
                    id,
                    &[],
                    json!({
                        "id": id,
                        "version": 1,
                        "type": BlockType::CollectionView,
                        "collection_id": collection_id,
                        "view_ids": compiled.view_ids(),
                        "parent_id": parent.id(),
                        "parent_table": parent.table(),
                        "alive": true,
                    }),
                ));
                self.attach_views(collection_id, compiled, BlockType::CollectionView, id, created);
            }
            BlockKind::Factory { contents } => {
                let mut children = Vec::with_capacity(contents.len());
                for leaf in contents {
                    let child_id = self.fresh_id()?;
                    self.out.touch_list.push(IdRef::from(child_id.clone()));
                    children.push((child_id, leaf));
                }
                let mut args = self.block_args(id, block_type, spec, parent);
                args.insert(
                    "content".into(),
                    json!(children.iter().map(|(child_id, _)| child_id).collect::<Vec<_>>()),
                );
                self.push(Table::Block.update(id, &[], Value::Object(args)));

                let mut nested = BlockMap::new();
                for (child_id, leaf) in &children {
                    let op = self.leaf_op(child_id, leaf, id);
                    self.push(op);
                    nested.entry(leaf.block_type).or_default().push(Created::Block(child_id.clone()));
                }
                created.entry(block_type).or_default().push(Created::Factory {
                    block_id: id.clone(),
                    contents: nested,
                });
            }
            BlockKind::Embed { provider, source } => {
                pause(self.interval());
                let render = self
                    .resolver
                    .resolve_embed_metadata(source, *provider, self.config.embed_page_width)?;
                let mut args = self.block_args(id, block_type, spec, parent);
                let mut format = spec.format.clone();
                format.extend(render);
                args.insert("format".into(), Value::Object(format));
                self.push(Table::Block.update(id, &[], Value::Object(args)));
                created.entry(block_type).or_default().push(Created::Block(id.clone()));
            }
            BlockKind::Bookmark { link } => {
                pause(self.interval());
                self.resolver.register_bookmark_metadata(id, link)?;
                self.push_basic(id, block_type, spec, parent, created);
            }
            BlockKind::Drive { file_id } => {
                pause(self.interval());
                let accounts = self.resolver.drive_accounts()?;
                let account = accounts.first().ok_or(EngineError::NoDriveAccount)?;
                pause(self.interval());
                let handle = self
                    .resolver
                    .resolve_external_file_handle(id, file_id, &account.token)?;
                debug!(block = %id, file = %file_id, handle = %handle, "resolved drive file");
                self.push_basic(id, block_type, spec, parent, created);
            }
            BlockKind::Basic(_) => self.push_basic(id, block_type, spec, parent, created),
            BlockKind::LinkToPage { .. } => {}
        }
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.config.request_interval()
    }

    fn push(&mut self, op: Operation) {
        self.out.ops.push(op);
    }

    fn push_basic(
        &mut self,
        id: &RecordId,
        block_type: BlockType,
        spec: &BlockSpec,
        parent: &Parent,
        created: &mut BlockMap,
    ) {
        let args = self.block_args(id, block_type, spec, parent);
        self.push(Table::Block.update(id, &[], Value::Object(args)));
        created.entry(block_type).or_default().push(Created::Block(id.clone()));
    }

    fn block_args(
        &mut self,
        id: &RecordId,
        block_type: BlockType,
        spec: &BlockSpec,
        parent: &Parent,
    ) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("id".into(), json!(id));
        args.insert("type".into(), json!(block_type));
        args.insert("properties".into(), Value::Object(spec.properties.clone()));
        args.insert("format".into(), Value::Object(spec.format.clone()));
        args.insert("parent_id".into(), json!(parent.id()));
        args.insert("parent_table".into(), json!(parent.table()));
        args.insert("alive".into(), json!(true));
        let stamp = self.clock.follow();
        args.insert("created_time".into(), json!(stamp));
        args.insert("last_edited_time".into(), json!(stamp));
        args
    }

    fn leaf_op(&mut self, id: &RecordId, leaf: &LeafSpec, factory_id: &RecordId) -> Operation {
        let stamp = self.clock.follow();
        Table::Block.update(
            id,
            &[],
            json!({
                "id": id,
                "type": leaf.block_type,
                "properties": leaf.properties,
                "format": leaf.format,
                "parent_id": factory_id,
                "parent_table": "block",
                "alive": true,
                "created_time": stamp,
                "last_edited_time": stamp,
            }),
        )
    }

    fn default_permissions(&self, is_private: bool) -> Result<Value, CoreError> {
        let permission_type = if is_private {
            PermissionType::UserPermission
        } else {
            PermissionType::SpacePermission
        };
        let permission = Permission::new(permission_type, PermissionRole::Editor, Some(self.config.user_id.clone()));
        serde_json::to_value(vec![permission]).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    fn compile_views(
        &mut self,
        schema: &Schema,
        views: &[ViewSpec],
        collection_id: &RecordId,
        block_id: &RecordId,
    ) -> Result<CompiledViews, EngineError> {
        let mut view_ids = Vec::with_capacity(views.len());
        for _ in views {
            view_ids.push(self.fresh_id()?);
        }
        let compiler = ViewCompiler {
            schema,
            collection_id,
            parent_id: block_id,
            default_width: self.config.default_column_width,
        };
        let mut drawn = view_ids.into_iter();
        let compiled = compiler.compile_all(views, || drawn.next().unwrap_or_default())?;
        Ok(compiled)
    }

    fn attach_views(
        &mut self,
        collection_id: &RecordId,
        compiled: CompiledViews,
        block_type: BlockType,
        block_id: &RecordId,
        created: &mut BlockMap,
    ) {
        self.out
            .touch_list
            .push(IdRef::new(collection_id, Table::Collection));
        for (view_id, _) in &compiled.views {
            self.out.touch_list.push(IdRef::new(view_id, Table::CollectionView));
        }
        created.entry(block_type).or_default().push(Created::Collection {
            block_id: block_id.clone(),
            collection_id: collection_id.clone(),
            views: view_map(&compiled.views),
        });
        self.out.ops.extend(compiled.ops);
    }

    fn list_in_parent(
        &mut self,
        parent: &Parent,
        child: &RecordId,
        position: Option<&Position>,
    ) -> Result<(), EngineError> {
        let Some(slot) = parent.slot() else {
            return Ok(());
        };
        let store = self.store;
        let container = self.containers.entry(slot.clone()).or_insert_with(|| {
            store
                .get(slot.table, &slot.owner)
                .and_then(|record| record.child_ids(slot.field))
                .map(<[RecordId]>::to_vec)
                .unwrap_or_default()
        });
        let position = position.cloned().unwrap_or_default();
        let op = insert_into(container, &slot, child, &position)?;
        self.push(op);
        Ok(())
    }
}
