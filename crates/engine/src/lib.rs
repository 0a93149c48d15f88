pub mod config;
pub mod error;
pub mod remote;
pub mod sync;
pub mod tree;
pub mod views;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, TransportError};
pub use remote::{BulkReader, DriveAccount, FetchRequest, MetadataResolver, Remote, TransactionSender};
pub use tree::{BlockMap, Created, Parent, ViewMap, block_counts};

use std::collections::HashSet;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use docgraph_core::{
    Block, BlockKind, BlockSpec, BlockType, BlockUpdate, ChildField, ChildSlot, Collection, CoreError,
    EditClock, IdGenerator, Operation, Permission, Position, Record, RecordId, Schema, SchemaType, SchemaUnit,
    Table, TransactionRequest, UuidGenerator, View, ViewSpec,
    children::{insert_into, remove_from},
    schema::schema_key,
    view::{FilterSpec, PropertyUpdate, SortSpec},
};
use docgraph_storage::{IdRef, MemoryStore, RecordStore};

use crate::sync::pause;
use crate::tree::{TreeCompiler, view_map};
use crate::views::{ViewCompiler, ViewEditor, add_hidden_property, forget_property};

/// Client-side access layer over one remote workspace.
///
/// Every mutating method takes `&mut self`, so one engine never runs two
/// structural mutations at once. Each call compiles its intent into a single
/// transaction, sends it, then applies the same operations to the local
/// cache. Nothing is rolled back when a later step fails.
pub struct Engine<R: Remote> {
    store: MemoryStore,
    remote: R,
    ids: Box<dyn IdGenerator>,
    clock: EditClock,
    config: EngineConfig,
}

impl<R: Remote> Engine<R> {
    pub fn new(config: EngineConfig, remote: R) -> Self {
        Self::with_id_generator(config, remote, Box::new(UuidGenerator))
    }

    pub fn with_id_generator(config: EngineConfig, remote: R, ids: Box<dyn IdGenerator>) -> Self {
        Self {
            store: MemoryStore::new(),
            remote,
            ids,
            clock: EditClock::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Send `ops` as one transaction, mirror them locally, merge the
    /// response and optionally refresh `touched`.
    fn commit(&mut self, ops: Vec<Operation>, touched: Vec<IdRef>) -> Result<(), EngineError> {
        if ops.is_empty() {
            return Ok(());
        }
        let request = TransactionRequest::single(self.config.shard_id, &self.config.space_id, ops);
        pause(self.config.request_interval());
        let response = self.remote.send(&request)?;

        // Field writes to records we never fetched would leave partial records
        // behind; the refresh below picks those up instead.
        for op in request.operations() {
            if op.is_record_write() || self.store.contains(op.table, &op.id) {
                self.store.apply(op)?;
            }
        }
        self.store.ingest(&response)?;
        info!(ops = request.operations().count(), touched = touched.len(), "committed transaction");

        if self.config.refresh_after_write && !touched.is_empty() {
            sync::force_refresh(&mut self.store, &mut self.remote, &touched, self.config.request_interval())?;
        }
        Ok(())
    }

    fn require(&self, table: Table, id: &RecordId) -> Result<&Record, EngineError> {
        self.store.get(table, id).ok_or_else(|| EngineError::not_found(table, id))
    }

    fn require_block(&self, id: &RecordId) -> Result<&Block, EngineError> {
        self.store.block(id).ok_or_else(|| EngineError::not_found(Table::Block, id))
    }

    fn require_collection(&self, id: &RecordId) -> Result<&Collection, EngineError> {
        self.store
            .collection(id)
            .ok_or_else(|| EngineError::not_found(Table::Collection, id))
    }

    /// The collection behind a `collection_view(_page)` block.
    fn collection_of(&self, block_id: &RecordId) -> Result<RecordId, EngineError> {
        let block = self.require_block(block_id)?;
        match (&block.collection_id, block.block_type().is_collection()) {
            (Some(collection_id), true) => Ok(collection_id.clone()),
            _ => Err(CoreError::InvalidContent(format!("{block_id} is not a collection block")).into()),
        }
    }

    /// `count` ids unused in the cache and among themselves.
    fn fresh_ids(&mut self, count: usize) -> Result<Vec<RecordId>, EngineError> {
        let mut fresh = Vec::with_capacity(count);
        let mut attempts = 0;
        while fresh.len() < count {
            attempts += 1;
            if attempts > count * tree::MAX_ID_ATTEMPTS {
                return Err(CoreError::InvalidData("id generator keeps returning used ids".into()).into());
            }
            let id = self.ids.new_id();
            if !self.store.contains_any(&id) && !fresh.contains(&id) {
                fresh.push(id);
            }
        }
        Ok(fresh)
    }

    fn ensure_child(container: &[RecordId], parent: &RecordId, child: &RecordId) -> Result<(), EngineError> {
        if container.contains(child) {
            Ok(())
        } else {
            Err(EngineError::NotParent {
                parent: parent.to_string(),
                child: child.to_string(),
            })
        }
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Load the acting user's top-level records.
    pub fn bootstrap(&mut self) -> Result<Vec<RecordId>, EngineError> {
        pause(self.config.request_interval());
        let subtree = self.remote.load_user_content()?;
        self.store.ingest(&subtree)?;
        let workspaces = self.store.ids(Table::Workspace);
        info!(workspaces = workspaces.len(), "bootstrapped");
        Ok(workspaces)
    }

    /// Fetch whatever of `refs` is not cached yet.
    pub fn ensure_present(&mut self, refs: &[IdRef]) -> Result<usize, EngineError> {
        sync::ensure_present(&mut self.store, &mut self.remote, refs, self.config.request_interval())
    }

    /// Re-fetch `refs` even when cached.
    pub fn force_refresh(&mut self, refs: &[IdRef]) -> Result<usize, EngineError> {
        sync::force_refresh(&mut self.store, &mut self.remote, refs, self.config.request_interval())
    }

    // ========================================================================
    // Creating content
    // ========================================================================

    fn create_tree(&mut self, specs: &[BlockSpec], parent: Parent) -> Result<BlockMap, EngineError> {
        let mut refs = vec![IdRef::new(parent.id(), parent.table())];
        refs.extend(
            BlockSpec::referenced_collections(specs)
                .into_iter()
                .map(|id| IdRef::from((id, Table::Collection))),
        );
        self.ensure_present(&refs)?;
        self.require(parent.table(), parent.id())?;

        self.clock.tick()?;
        let compiled = {
            let mut compiler = TreeCompiler::new(
                &self.store,
                &mut self.remote,
                self.ids.as_mut(),
                &self.config,
                &mut self.clock,
            );
            compiler.compile(specs, &parent)?;
            compiler.finish()
        };
        debug!(parent = %parent.id(), ops = compiled.ops.len(), "compiled content tree");

        let mut touched = compiled.touch_list;
        touched.push(IdRef::new(parent.id(), parent.table()));
        self.commit(compiled.ops, touched)?;
        Ok(compiled.created)
    }

    fn require_pages(specs: &[BlockSpec]) -> Result<(), EngineError> {
        match specs.iter().find(|s| !matches!(s.kind, BlockKind::Page { .. })) {
            Some(spec) => Err(CoreError::InvalidContent(format!(
                "expected pages, got {}",
                spec.block_type().as_str()
            ))
            .into()),
            None => Ok(()),
        }
    }

    /// Create pages (and anything nested in them) at the workspace root.
    pub fn create_root_pages(&mut self, workspace_id: &RecordId, specs: &[BlockSpec]) -> Result<BlockMap, EngineError> {
        self.create_tree(specs, Parent::Workspace(workspace_id.clone()))
    }

    /// Create blocks inside an existing page or block.
    pub fn create_blocks(&mut self, parent_id: &RecordId, specs: &[BlockSpec]) -> Result<BlockMap, EngineError> {
        self.create_tree(specs, Parent::Block(parent_id.clone()))
    }

    pub fn create_rows(&mut self, collection_id: &RecordId, rows: &[BlockSpec]) -> Result<BlockMap, EngineError> {
        Self::require_pages(rows)?;
        self.create_tree(rows, Parent::Rows(collection_id.clone()))
    }

    pub fn create_templates(&mut self, collection_id: &RecordId, specs: &[BlockSpec]) -> Result<BlockMap, EngineError> {
        Self::require_pages(specs)?;
        self.create_tree(specs, Parent::Templates(collection_id.clone()))
    }

    /// Add views to an existing collection block.
    pub fn create_views(&mut self, block_id: &RecordId, specs: &[ViewSpec]) -> Result<ViewMap, EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        let collection_id = self.collection_of(block_id)?;
        self.ensure_present(&[IdRef::new(&collection_id, Table::Collection)])?;
        let schema = self.require_collection(&collection_id)?.schema.clone();
        let mut view_ids = self.require_block(block_id)?.view_ids.clone();

        let fresh = self.fresh_ids(specs.len())?;
        let compiler = ViewCompiler {
            schema: &schema,
            collection_id: &collection_id,
            parent_id: block_id,
            default_width: self.config.default_column_width,
        };
        let mut drawn = fresh.into_iter();
        let compiled = compiler.compile_all(specs, || drawn.next().unwrap_or_default())?;

        let slot = ChildSlot::new(Table::Block, block_id, ChildField::ViewIds);
        let mut ops = compiled.ops;
        let mut touched = Vec::new();
        for (view_id, _) in &compiled.views {
            ops.push(insert_into(&mut view_ids, &slot, view_id, &Position::Append)?);
            touched.push(IdRef::new(view_id, Table::CollectionView));
        }
        self.commit(ops, touched)?;
        Ok(view_map(&compiled.views))
    }

    /// Copy a block `times` times into its own parent. Each copy carries the
    /// source's type, properties and format, but no children; `positions[i]`
    /// places copy `i`, and a missing entry puts the copy right after the
    /// source. Collection blocks cannot be copied this way.
    pub fn duplicate_block(
        &mut self,
        block_id: &RecordId,
        times: usize,
        positions: &[Position],
    ) -> Result<BlockMap, EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        let source = self.require_block(block_id)?.clone();
        let block_type = source.block_type();
        if block_type.is_collection() {
            return Err(CoreError::InvalidContent(format!("{block_id} is a collection block")).into());
        }
        let parent = IdRef::new(&source.parent_id, source.parent_table);
        self.ensure_present(std::slice::from_ref(&parent))?;

        // Rows hang off their collection without being listed anywhere.
        let slot = match self.require(parent.table, &parent.id)?.child_array() {
            Some((field, Table::Block)) if source.parent_table != Table::Collection || source.is_template => {
                Some(ChildSlot::new(parent.table, &parent.id, field))
            }
            _ => None,
        };
        let mut container = match &slot {
            Some(slot) => self
                .require(parent.table, &parent.id)?
                .child_ids(slot.field)
                .map(<[RecordId]>::to_vec)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let mut template = match serde_json::to_value(&source) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(CoreError::Serialization(e.to_string()).into()),
        };
        template.remove("version");
        template.insert("content".into(), json!([]));
        template.insert("copied_from".into(), json!(block_id));

        self.clock.tick()?;
        let mut ops = Vec::new();
        let mut created = BlockMap::new();
        let mut touched = vec![parent.clone()];
        for (index, id) in self.fresh_ids(times)?.into_iter().enumerate() {
            let stamp = self.clock.follow();
            let mut args = template.clone();
            args.insert("id".into(), json!(id));
            args.insert("created_time".into(), json!(stamp));
            args.insert("last_edited_time".into(), json!(stamp));
            ops.push(Table::Block.update(&id, &[], Value::Object(args)));
            if let Some(slot) = &slot {
                let position = positions
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| Position::After(block_id.clone()));
                ops.push(insert_into(&mut container, slot, &id, &position)?);
            }
            touched.push(IdRef::from(id.clone()));
            created.entry(block_type).or_default().push(Created::Block(id));
        }
        debug!(source = %block_id, copies = times, "duplicating block");
        self.commit(ops, touched)?;
        Ok(created)
    }

    // ========================================================================
    // Updating content
    // ========================================================================

    fn update_ops(&mut self, update: &BlockUpdate) -> Result<Vec<Operation>, EngineError> {
        let now = self.clock.tick()?;
        let mut ops = Vec::new();
        if let Some(properties) = &update.properties {
            ops.push(Table::Block.update(&update.id, &["properties"], Value::Object(properties.clone())));
        }
        if let Some(format) = &update.format {
            ops.push(Table::Block.update(&update.id, &["format"], Value::Object(format.clone())));
        }
        ops.push(Table::Block.set(&update.id, &["last_edited_time"], json!(now)));
        Ok(ops)
    }

    /// Merge new properties and/or format into one block.
    pub fn update_block(&mut self, update: &BlockUpdate) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::from(update.id.clone())])?;
        self.require_block(&update.id)?;
        let ops = self.update_ops(update)?;
        self.commit(ops, vec![IdRef::from(update.id.clone())])
    }

    fn update_children(
        &mut self,
        owner: IdRef,
        field: ChildField,
        updates: &[BlockUpdate],
    ) -> Result<(), EngineError> {
        self.ensure_present(std::slice::from_ref(&owner))?;
        let container = self
            .require(owner.table, &owner.id)?
            .child_ids(field)
            .map(<[RecordId]>::to_vec)
            .unwrap_or_default();
        let mut ops = Vec::new();
        let mut touched = Vec::new();
        for update in updates {
            Self::ensure_child(&container, &owner.id, &update.id)?;
            ops.extend(self.update_ops(update)?);
            touched.push(IdRef::from(update.id.clone()));
        }
        self.commit(ops, touched)
    }

    pub fn update_root_pages(&mut self, workspace_id: &RecordId, updates: &[BlockUpdate]) -> Result<(), EngineError> {
        self.update_children(IdRef::new(workspace_id, Table::Workspace), ChildField::Pages, updates)
    }

    pub fn update_templates(&mut self, collection_id: &RecordId, updates: &[BlockUpdate]) -> Result<(), EngineError> {
        self.update_children(IdRef::new(collection_id, Table::Collection), ChildField::TemplatePages, updates)
    }

    /// Change a block's type in place.
    pub fn convert_to(&mut self, block_id: &RecordId, block_type: BlockType) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        self.require_block(block_id)?;
        let op = Table::Block.update(block_id, &[], json!({ "type": block_type }));
        self.commit(vec![op], vec![IdRef::from(block_id.clone())])
    }

    /// Upsert one permission entry of a block.
    pub fn set_permission(&mut self, block_id: &RecordId, permission: &Permission) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        self.require_block(block_id)?;
        let args = serde_json::to_value(permission).map_err(|e| CoreError::Serialization(e.to_string()))?;
        let op = Table::Block.set_permission_item(block_id, &["permissions"], args);
        self.commit(vec![op], vec![IdRef::from(block_id.clone())])
    }

    /// Bookmark `page_id` in the configured workspace, or un-bookmark it.
    /// Returns whether the page is bookmarked afterwards.
    pub fn toggle_favourite(&mut self, page_id: &RecordId) -> Result<bool, EngineError> {
        let space_id = self.config.space_id.clone();
        let view = self
            .store
            .records(Table::WorkspaceView)
            .find_map(|record| match record {
                Record::WorkspaceView(view) if view.space_id == space_id => Some(view.clone()),
                _ => None,
            })
            .ok_or_else(|| EngineError::not_found(Table::WorkspaceView, &space_id))?;

        let slot = ChildSlot::new(Table::WorkspaceView, &view.id, ChildField::BookmarkedPages);
        let mut bookmarks = view.bookmarked_pages.clone();
        let (op, bookmarked) = match remove_from(&mut bookmarks, &slot, page_id) {
            Some(op) => (op, false),
            None => (insert_into(&mut bookmarks, &slot, page_id, &Position::Index(0))?, true),
        };
        self.commit(vec![op], vec![IdRef::new(&view.id, Table::WorkspaceView)])?;
        Ok(bookmarked)
    }

    // ========================================================================
    // Moving content
    // ========================================================================

    /// Move an existing record within its parent's child array.
    pub fn reposition(&mut self, table: Table, id: &RecordId, position: &Position) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::new(id, table)])?;
        let (parent_id, parent_table) = match self.require(table, id)?.parent() {
            Some((parent_id, parent_table)) => (parent_id.clone(), parent_table),
            None => {
                return Err(CoreError::InvalidContent(format!("{table} {id} has no parent to reorder in")).into());
            }
        };
        self.ensure_present(&[IdRef::new(&parent_id, parent_table)])?;

        let parent = self.require(parent_table, &parent_id)?;
        let (field, child_table) = parent.child_array().ok_or_else(|| EngineError::NotParent {
            parent: parent_id.to_string(),
            child: id.to_string(),
        })?;
        if child_table != table {
            return Err(EngineError::NotParent {
                parent: parent_id.to_string(),
                child: id.to_string(),
            });
        }
        let mut container = parent.child_ids(field).map(<[RecordId]>::to_vec).unwrap_or_default();
        Self::ensure_child(&container, &parent_id, id)?;

        let slot = ChildSlot::new(parent_table, &parent_id, field);
        let op = insert_into(&mut container, &slot, id, position)?;
        self.commit(vec![op], vec![IdRef::new(&parent_id, parent_table)])
    }

    /// Move a block under another block.
    pub fn transfer(&mut self, block_id: &RecordId, new_parent_id: &RecordId) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone()), IdRef::from(new_parent_id.clone())])?;
        self.require_block(new_parent_id)?;
        let block = self.require_block(block_id)?;
        let (old_parent, old_table) = (block.parent_id.clone(), block.parent_table);
        let now = self.clock.tick()?;

        let mut ops = vec![Table::Block.update(
            block_id,
            &[],
            json!({
                "last_edited_time": now,
                "permissions": null,
                "parent_id": new_parent_id,
                "parent_table": "block",
                "alive": true,
            }),
        )];
        let old_field = match old_table {
            Table::Workspace => ChildField::Pages,
            Table::Collection => ChildField::TemplatePages,
            _ => ChildField::Content,
        };
        ops.push(old_table.list_remove(&old_parent, &[old_field.as_str()], json!({ "id": block_id })));
        ops.push(Table::Block.list_after(new_parent_id, &["content"], json!({ "after": "", "id": block_id })));
        if old_table == Table::Block {
            ops.push(Table::Block.set(&old_parent, &["last_edited_time"], json!(now)));
        }
        ops.push(Table::Block.set(new_parent_id, &["last_edited_time"], json!(now)));

        self.commit(
            ops,
            vec![
                IdRef::from(block_id.clone()),
                IdRef::new(&old_parent, old_table),
                IdRef::from(new_parent_id.clone()),
            ],
        )
    }

    // ========================================================================
    // Deleting content
    // ========================================================================

    /// Mark children dead, unlist them, and stamp the owner.
    fn delete_children(
        &mut self,
        owner: IdRef,
        field: ChildField,
        child_table: Table,
        ids: &[RecordId],
    ) -> Result<(), EngineError> {
        self.ensure_present(std::slice::from_ref(&owner))?;
        let mut container = self
            .require(owner.table, &owner.id)?
            .child_ids(field)
            .map(<[RecordId]>::to_vec)
            .unwrap_or_default();
        let slot = ChildSlot::new(owner.table, &owner.id, field);
        let now = self.clock.tick()?;

        let mut ops = Vec::new();
        for id in ids {
            Self::ensure_child(&container, &owner.id, id)?;
            let mut args = Map::new();
            args.insert("alive".into(), json!(false));
            if child_table == Table::Block {
                args.insert("last_edited_time".into(), json!(now));
            }
            ops.push(child_table.update(id, &[], Value::Object(args)));
            if let Some(op) = remove_from(&mut container, &slot, id) {
                ops.push(op);
            }
        }
        if !ops.is_empty() && owner.table == Table::Block {
            ops.push(Table::Block.set(&owner.id, &["last_edited_time"], json!(now)));
        }
        debug!(owner = %owner.id, deleted = ids.len(), "deleting children");
        self.commit(ops, vec![owner])
    }

    pub fn delete_blocks(&mut self, parent_id: &RecordId, ids: &[RecordId]) -> Result<(), EngineError> {
        self.delete_children(IdRef::from(parent_id.clone()), ChildField::Content, Table::Block, ids)
    }

    pub fn delete_root_pages(&mut self, workspace_id: &RecordId, ids: &[RecordId]) -> Result<(), EngineError> {
        self.delete_children(IdRef::new(workspace_id, Table::Workspace), ChildField::Pages, Table::Block, ids)
    }

    pub fn delete_templates(&mut self, collection_id: &RecordId, ids: &[RecordId]) -> Result<(), EngineError> {
        self.delete_children(
            IdRef::new(collection_id, Table::Collection),
            ChildField::TemplatePages,
            Table::Block,
            ids,
        )
    }

    pub fn delete_views(&mut self, block_id: &RecordId, ids: &[RecordId]) -> Result<(), EngineError> {
        self.delete_children(IdRef::from(block_id.clone()), ChildField::ViewIds, Table::CollectionView, ids)
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Cached views rendering `collection_id`.
    fn views_of(&self, collection_id: &RecordId) -> Vec<View> {
        self.store
            .records(Table::CollectionView)
            .filter_map(|record| match record {
                Record::View(view) => Some(view),
                _ => None,
            })
            .filter(|view| {
                self.store
                    .block(&view.parent_id)
                    .is_some_and(|block| block.collection_id.as_ref() == Some(collection_id))
            })
            .cloned()
            .collect()
    }

    fn schema_op(collection_id: &RecordId, schema: &Schema) -> Result<Operation, EngineError> {
        let schema = serde_json::to_value(schema).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Table::Collection.update(collection_id, &[], json!({ "schema": schema })))
    }

    /// Add columns. Each name is slugged into its key; existing views list
    /// the new keys as hidden.
    pub fn create_schema_units(&mut self, collection_id: &RecordId, units: &[SchemaUnit]) -> Result<Vec<String>, EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        let mut schema = self.require_collection(collection_id)?.schema.clone();
        let views = self.views_of(collection_id);

        let mut keys = Vec::with_capacity(units.len());
        for unit in units {
            let key = schema_key(&unit.name);
            schema.insert_new(collection_id.as_str(), key.clone(), unit.clone())?;
            keys.push(key);
        }

        let mut ops = vec![Self::schema_op(collection_id, &schema)?];
        let mut touched = vec![IdRef::new(collection_id, Table::Collection)];
        for view in &views {
            let mut view = view.clone();
            for key in &keys {
                if let Some(op) = add_hidden_property(&view, key)? {
                    view.format.insert(view.kind.properties_field(), op.args.clone());
                    ops.push(op);
                }
            }
            touched.push(IdRef::new(&view.id, Table::CollectionView));
        }
        self.commit(ops, touched)?;
        Ok(keys)
    }

    /// Replace the descriptor of an existing column. The key is kept even if
    /// the name changes.
    pub fn update_schema_unit(&mut self, collection_id: &RecordId, key: &str, unit: &SchemaUnit) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        let mut schema = self.require_collection(collection_id)?.schema.clone();
        match schema.get_mut(key) {
            Some(existing) => *existing = unit.clone(),
            None => {
                return Err(CoreError::UnknownColumn {
                    collection_id: collection_id.to_string(),
                    column: key.to_string(),
                }
                .into());
            }
        }
        let op = Self::schema_op(collection_id, &schema)?;
        self.commit(vec![op], vec![IdRef::new(collection_id, Table::Collection)])
    }

    /// Drop columns and every view reference to them. The title column
    /// cannot be dropped.
    pub fn delete_schema_units(&mut self, collection_id: &RecordId, keys: &[String]) -> Result<(), EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        let mut schema = self.require_collection(collection_id)?.schema.clone();
        for key in keys {
            match schema.get(key) {
                Some(unit) if unit.unit_type == SchemaType::Title => {
                    return Err(CoreError::InvalidContent(format!("the title column {key} cannot be deleted")).into());
                }
                Some(_) => {
                    schema.remove(key);
                }
                None => {
                    return Err(CoreError::UnknownColumn {
                        collection_id: collection_id.to_string(),
                        column: key.clone(),
                    }
                    .into());
                }
            }
        }

        let mut ops = vec![Self::schema_op(collection_id, &schema)?];
        let mut touched = vec![IdRef::new(collection_id, Table::Collection)];
        for mut view in self.views_of(collection_id) {
            for key in keys {
                for op in forget_property(&view, key)? {
                    match op.path.as_slice() {
                        [query] if query == "query2" => {
                            view.query2 = serde_json::from_value(op.args.clone())
                                .map_err(|e| CoreError::Serialization(e.to_string()))?;
                        }
                        _ => {
                            view.format.insert(view.kind.properties_field(), op.args.clone());
                        }
                    }
                    ops.push(op);
                }
            }
            touched.push(IdRef::new(&view.id, Table::CollectionView));
        }
        self.commit(ops, touched)
    }

    // ========================================================================
    // Editing views
    // ========================================================================

    /// Run `edit` against a working copy of the view and send what changed.
    fn edit_view<T>(
        &mut self,
        view_id: &RecordId,
        edit: impl FnOnce(&mut ViewEditor) -> Result<T, CoreError>,
    ) -> Result<T, EngineError> {
        self.ensure_present(&[IdRef::new(view_id, Table::CollectionView)])?;
        let view = self
            .store
            .view(view_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Table::CollectionView, view_id))?;
        self.ensure_present(&[IdRef::from(view.parent_id.clone())])?;
        let collection_id = self.collection_of(&view.parent_id)?;
        self.ensure_present(&[IdRef::new(&collection_id, Table::Collection)])?;
        let schema = self.require_collection(&collection_id)?.schema.clone();

        let mut editor = ViewEditor::new(&view, &schema, &collection_id)?;
        let result = edit(&mut editor)?;
        let ops = editor.finish()?;
        self.commit(ops, vec![IdRef::new(view_id, Table::CollectionView)])?;
        Ok(result)
    }

    /// Add sorts, each spliced at its position or appended.
    pub fn create_sorts(&mut self, view_id: &RecordId, sorts: &[(&str, SortSpec)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            sorts.iter().try_for_each(|(column, sort)| editor.add_sort(column, *sort))
        })
    }

    pub fn update_sorts(&mut self, view_id: &RecordId, sorts: &[(&str, SortSpec)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            sorts.iter().try_for_each(|(column, sort)| editor.update_sort(column, *sort))
        })
    }

    pub fn delete_sorts(&mut self, view_id: &RecordId, columns: &[&str]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| columns.iter().try_for_each(|column| editor.remove_sort(column)))
    }

    pub fn create_filters(&mut self, view_id: &RecordId, filters: &[(&str, FilterSpec)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            filters.iter().try_for_each(|(column, filter)| editor.add_filter(column, filter))
        })
    }

    pub fn update_filters(&mut self, view_id: &RecordId, filters: &[(&str, FilterSpec)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            filters.iter().try_for_each(|(column, filter)| editor.update_filter(column, filter))
        })
    }

    pub fn delete_filters(&mut self, view_id: &RecordId, columns: &[&str]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| columns.iter().try_for_each(|column| editor.remove_filters(column)))
    }

    pub fn create_aggregations(&mut self, view_id: &RecordId, aggregations: &[(&str, &str)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            aggregations.iter().try_for_each(|(column, aggregator)| editor.add_aggregation(column, aggregator))
        })
    }

    pub fn update_aggregations(&mut self, view_id: &RecordId, aggregations: &[(&str, &str)]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            aggregations.iter().try_for_each(|(column, aggregator)| editor.update_aggregation(column, aggregator))
        })
    }

    pub fn delete_aggregations(&mut self, view_id: &RecordId, columns: &[&str]) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| columns.iter().try_for_each(|column| editor.remove_aggregation(column)))
    }

    /// Change width, visibility or order of columns in a view.
    pub fn update_view_properties(
        &mut self,
        view_id: &RecordId,
        updates: &[(&str, PropertyUpdate)],
    ) -> Result<(), EngineError> {
        self.edit_view(view_id, |editor| {
            updates.iter().try_for_each(|(column, update)| editor.update_property(column, *update))
        })
    }

    /// Show (`Some(true)`), hide (`Some(false)`) or flip (`None`) one column.
    /// Returns whether the column is visible afterwards.
    pub fn toggle_property_visibility(
        &mut self,
        view_id: &RecordId,
        column: &str,
        visible: Option<bool>,
    ) -> Result<bool, EngineError> {
        self.edit_view(view_id, |editor| editor.set_visibility(column, visible))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Live pages listed at the root of a workspace, in display order.
    pub fn root_pages(&mut self, workspace_id: &RecordId) -> Result<Vec<Block>, EngineError> {
        self.ensure_present(&[IdRef::new(workspace_id, Table::Workspace)])?;
        let pages = self
            .store
            .workspace(workspace_id)
            .ok_or_else(|| EngineError::not_found(Table::Workspace, workspace_id))?
            .pages
            .clone();
        self.collect_blocks(&pages, |block| block.block_type().is_root_page())
    }

    fn collect_blocks(&mut self, ids: &[RecordId], keep: impl Fn(&Block) -> bool) -> Result<Vec<Block>, EngineError> {
        let refs: Vec<IdRef> = ids.iter().cloned().map(IdRef::from).collect();
        self.ensure_present(&refs)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.store.block(id))
            .filter(|block| block.alive && keep(block))
            .cloned()
            .collect())
    }

    /// Everything under a block, grouped the way the tree compiler reports
    /// what it created.
    pub fn blocks(&mut self, block_id: &RecordId) -> Result<BlockMap, EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        let content = self.require_block(block_id)?.content.clone();
        let mut map = BlockMap::new();
        let mut visited = HashSet::from([block_id.clone()]);
        self.walk(block_id, Table::Block, &content, &mut map, &mut visited)?;
        Ok(map)
    }

    /// Collect the blocks among `ids` that `owner` owns and descend into
    /// them. Entries linking to a page that lives elsewhere are skipped.
    fn walk(
        &mut self,
        owner: &RecordId,
        owner_table: Table,
        ids: &[RecordId],
        map: &mut BlockMap,
        visited: &mut HashSet<RecordId>,
    ) -> Result<(), EngineError> {
        let owned = self.collect_blocks(ids, |block| &block.parent_id == owner && block.parent_table == owner_table)?;
        for block in owned {
            if !visited.insert(block.id.clone()) {
                continue;
            }
            let entry = match block.block_type() {
                BlockType::CollectionView | BlockType::CollectionViewPage => {
                    let Some(collection_id) = block.collection_id.clone() else {
                        continue;
                    };
                    let views = self.views(&block.id)?;
                    self.ensure_present(&[IdRef::new(&collection_id, Table::Collection)])?;
                    let owns_collection = self
                        .store
                        .collection(&collection_id)
                        .is_some_and(|collection| collection.parent_id == block.id);
                    // A linked database shows rows that belong to another block.
                    if owns_collection {
                        let rows: Vec<RecordId> = self.rows(&collection_id)?.into_iter().map(|b| b.id).collect();
                        self.walk(&collection_id, Table::Collection, &rows, map, visited)?;
                    }
                    Created::Collection {
                        block_id: block.id.clone(),
                        collection_id,
                        views,
                    }
                }
                BlockType::Factory => {
                    let mut contents = BlockMap::new();
                    let children = self.collect_blocks(&block.content, |child| child.parent_id == block.id)?;
                    for child in children {
                        if visited.insert(child.id.clone()) {
                            contents.entry(child.block_type()).or_default().push(Created::Block(child.id));
                        }
                    }
                    Created::Factory {
                        block_id: block.id.clone(),
                        contents,
                    }
                }
                block_type => {
                    if block_type == BlockType::Page {
                        self.walk(&block.id, Table::Block, &block.content, map, visited)?;
                    }
                    Created::Block(block.id.clone())
                }
            };
            map.entry(block.block_type()).or_default().push(entry);
        }
        Ok(())
    }

    /// Views of a collection block, by kind.
    pub fn views(&mut self, block_id: &RecordId) -> Result<ViewMap, EngineError> {
        self.ensure_present(&[IdRef::from(block_id.clone())])?;
        let view_ids = self.require_block(block_id)?.view_ids.clone();
        let refs: Vec<IdRef> = view_ids.iter().map(|id| IdRef::new(id, Table::CollectionView)).collect();
        self.ensure_present(&refs)?;
        let views: Vec<_> = view_ids
            .iter()
            .filter_map(|id| self.store.view(id))
            .map(|view| (view.id.clone(), view.kind))
            .collect();
        Ok(view_map(&views))
    }

    /// Cached rows of a collection. Templates are not rows.
    pub fn rows(&mut self, collection_id: &RecordId) -> Result<Vec<Block>, EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        self.require_collection(collection_id)?;
        let mut rows: Vec<Block> = self
            .store
            .records(Table::Block)
            .filter_map(|record| match record {
                Record::Block(block) => Some(block),
                _ => None,
            })
            .filter(|block| {
                block.parent_table == Table::Collection
                    && &block.parent_id == collection_id
                    && block.alive
                    && !block.is_template
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_time, a.id.as_str()).cmp(&(b.created_time, b.id.as_str())));
        Ok(rows)
    }

    pub fn templates(&mut self, collection_id: &RecordId) -> Result<Vec<Block>, EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        let ids = self.require_collection(collection_id)?.template_pages.clone();
        self.collect_blocks(&ids, |_| true)
    }

    pub fn schema_units(&mut self, collection_id: &RecordId) -> Result<Schema, EngineError> {
        self.ensure_present(&[IdRef::new(collection_id, Table::Collection)])?;
        Ok(self.require_collection(collection_id)?.schema.clone())
    }
}
