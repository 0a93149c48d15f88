use docgraph_core::{
    BlockSpec, BlockType, BlockUpdate, Command, Permission, Position, RecordId, SchemaType,
    SchemaUnit, Table, ViewKind, ViewSpec,
    records::{PermissionRole, PermissionType},
    rich_text,
    view::ViewOptions,
};
use docgraph_engine::{Engine, EngineConfig, EngineError, ErrorKind};
use docgraph_harness::{FakeRemote, SPACE_ID, SPACE_VIEW_ID, SequentialIds, TestPeer, USER_ID, first_of};
use docgraph_storage::RecordStore;
use serde_json::{Map, json};

fn text(title: &str) -> BlockSpec {
    BlockSpec::basic(BlockType::Text, title)
}

fn root_pages(peer: &mut TestPeer, titles: &[&str]) -> Result<Vec<RecordId>, EngineError> {
    let space = peer.space_id();
    let specs: Vec<BlockSpec> = titles.iter().map(|t| BlockSpec::page(t, vec![])).collect();
    let created = peer.engine.create_root_pages(&space, &specs)?;
    Ok(created[&BlockType::Page].iter().map(|c| c.block_id().clone()).collect())
}

fn title_update(id: &RecordId, title: &str) -> BlockUpdate {
    let mut properties = Map::new();
    properties.insert("title".into(), rich_text::text(title));
    BlockUpdate {
        id: id.clone(),
        properties: Some(properties),
        format: None,
    }
}

// ============================================================================
// Reordering
// ============================================================================

#[test]
fn reposition_by_index_is_a_single_operation() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let ids = root_pages(&mut peer, &["a", "b", "c", "d"])?;
    let space = peer.space_id();
    assert_eq!(peer.engine.store().workspace(&space).unwrap().pages, ids);

    peer.engine.reposition(Table::Block, &ids[0], &Position::Index(2))?;

    let ops = peer.server().last_operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].command, Command::ListBefore);

    let expected = vec![ids[1].clone(), ids[2].clone(), ids[0].clone(), ids[3].clone()];
    assert_eq!(peer.engine.store().workspace(&space).unwrap().pages, expected);
    assert_eq!(peer.server().content_of(Table::Workspace, &space, "pages"), expected);
    Ok(())
}

#[test]
fn reposition_relative_to_a_sibling() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let created = peer.engine.create_blocks(&page, &[text("x"), text("y"), text("z")])?;
    let ids: Vec<RecordId> = created[&BlockType::Text].iter().map(|c| c.block_id().clone()).collect();

    peer.engine
        .reposition(Table::Block, &ids[2], &Position::Before(ids[0].clone()))?;
    assert_eq!(
        peer.engine.store().block(&page).unwrap().content,
        vec![ids[2].clone(), ids[0].clone(), ids[1].clone()]
    );

    let err = peer
        .engine
        .reposition(Table::Block, &ids[0], &Position::After("ghost".into()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    Ok(())
}

// ============================================================================
// Updates
// ============================================================================

#[test]
fn update_block_merges_properties_and_format() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Draft")?;
    let before = peer.engine.store().block(&page).unwrap().last_edited_time;

    let mut update = title_update(&page, "Final");
    let mut format = Map::new();
    format.insert("page_icon".into(), json!("📄"));
    update.format = Some(format);
    peer.engine.update_block(&update)?;

    let block = peer.engine.store().block(&page).unwrap();
    assert_eq!(block.title(), "Final");
    assert_eq!(block.format["page_icon"], json!("📄"));
    assert!(block.last_edited_time > before);
    assert_eq!(peer.server().last_operations().len(), 3);
    Ok(())
}

#[test]
fn root_page_updates_reject_non_root_blocks() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let space = peer.space_id();
    let page = peer.create_page("Home")?;
    let nested = first_of(&peer.engine.create_blocks(&page, &[text("inner")])?, BlockType::Text)?;
    let sent = peer.server().transactions();

    let err = peer
        .engine
        .update_root_pages(&space, &[title_update(&nested, "x")])
        .unwrap_err();
    assert!(matches!(err, EngineError::NotParent { .. }));
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert_eq!(peer.server().transactions(), sent);

    peer.engine.update_root_pages(&space, &[title_update(&page, "Renamed")])?;
    assert_eq!(peer.engine.root_pages(&space)?[0].title(), "Renamed");
    Ok(())
}

#[test]
fn template_updates_reject_rows() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let (_, collection_id, _) = peer.create_database(
        "Tasks",
        vec![SchemaUnit::new("Name", SchemaType::Title)],
        vec![ViewSpec::new("All", ViewOptions::table())],
    )?;
    let row = first_of(
        &peer.engine.create_rows(&collection_id, &[BlockSpec::page("row", vec![])])?,
        BlockType::Page,
    )?;
    let template = first_of(
        &peer.engine.create_templates(&collection_id, &[BlockSpec::page("tpl", vec![])])?,
        BlockType::Page,
    )?;

    let err = peer
        .engine
        .update_templates(&collection_id, &[title_update(&row, "x")])
        .unwrap_err();
    assert!(matches!(err, EngineError::NotParent { .. }));

    peer.engine
        .update_templates(&collection_id, &[title_update(&template, "Weekly")])?;
    assert_eq!(peer.engine.templates(&collection_id)?[0].title(), "Weekly");
    Ok(())
}

#[test]
fn unmodeled_block_types_survive_a_local_edit() -> Result<(), Box<dyn std::error::Error>> {
    let mut remote = FakeRemote::seeded();
    remote.insert(
        Table::Block,
        json!({
            "id": "synced",
            "type": "synced_block",
            "parent_id": "elsewhere",
            "parent_table": "block",
            "properties": { "title": [["Shared"]] },
        }),
    );
    let config = EngineConfig {
        request_interval_ms: 0,
        refresh_after_write: false,
        ..EngineConfig::new(USER_ID, SPACE_ID)
    };
    let mut engine = Engine::with_id_generator(config, remote, Box::new(SequentialIds::default()));
    engine.bootstrap()?;

    let id = RecordId::from("synced");
    engine.update_block(&title_update(&id, "Renamed"))?;

    let cached = engine.store().get(Table::Block, &id).unwrap().to_value()?;
    assert_eq!(cached["type"], "synced_block");
    assert_eq!(engine.store().block(&id).unwrap().title(), "Renamed");
    Ok(())
}

#[test]
fn convert_to_changes_the_block_type_in_place() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let block = first_of(&peer.engine.create_blocks(&page, &[text("heading")])?, BlockType::Text)?;

    peer.engine.convert_to(&block, BlockType::Header)?;

    let converted = peer.engine.store().block(&block).unwrap();
    assert_eq!(converted.block_type(), BlockType::Header);
    assert_eq!(converted.title(), "heading");
    Ok(())
}

#[test]
fn permissions_are_upserted_by_grant() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Shared")?;
    let user = peer.engine.config().user_id.clone();
    assert_eq!(peer.engine.store().block(&page).unwrap().permissions.len(), 1);

    peer.engine.set_permission(
        &page,
        &Permission::new(PermissionType::PublicPermission, PermissionRole::Reader, None),
    )?;
    peer.engine.set_permission(
        &page,
        &Permission::new(PermissionType::SpacePermission, PermissionRole::Reader, Some(user)),
    )?;

    let permissions = &peer.engine.store().block(&page).unwrap().permissions;
    assert_eq!(permissions.len(), 2);
    assert!(permissions
        .iter()
        .all(|p| p.role == PermissionRole::Reader));
    Ok(())
}

#[test]
fn favourites_toggle_in_the_workspace_view() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let ids = root_pages(&mut peer, &["a", "b"])?;
    let view_id = RecordId::from(SPACE_VIEW_ID);

    assert!(peer.engine.toggle_favourite(&ids[0])?);
    assert!(peer.engine.toggle_favourite(&ids[1])?);
    assert_eq!(
        peer.engine.store().workspace_view(&view_id).unwrap().bookmarked_pages,
        vec![ids[1].clone(), ids[0].clone()]
    );

    assert!(!peer.engine.toggle_favourite(&ids[0])?);
    assert_eq!(
        peer.server().content_of(Table::WorkspaceView, &view_id, "bookmarked_pages"),
        vec![ids[1].clone()]
    );
    Ok(())
}

// ============================================================================
// Moves
// ============================================================================

#[test]
fn transfer_moves_a_block_between_pages() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let pages = root_pages(&mut peer, &["from", "to"])?;
    let block = first_of(&peer.engine.create_blocks(&pages[0], &[text("moving")])?, BlockType::Text)?;

    peer.engine.transfer(&block, &pages[1])?;

    let store = peer.engine.store();
    assert!(store.block(&pages[0]).unwrap().content.is_empty());
    assert_eq!(store.block(&pages[1]).unwrap().content, vec![block.clone()]);
    let moved = store.block(&block).unwrap();
    assert_eq!(moved.parent_id, pages[1]);
    assert!(moved.permissions.is_empty());
    assert_eq!(peer.server().last_operations().len(), 5);
    Ok(())
}

#[test]
fn transfer_takes_root_pages_out_of_the_workspace() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let space = peer.space_id();
    let pages = root_pages(&mut peer, &["outer", "inner"])?;

    peer.engine.transfer(&pages[1], &pages[0])?;

    assert_eq!(peer.engine.store().workspace(&space).unwrap().pages, vec![pages[0].clone()]);
    assert_eq!(peer.engine.root_pages(&space)?.len(), 1);
    let moved = peer.engine.store().block(&pages[1]).unwrap();
    assert_eq!(moved.parent_table, Table::Block);
    Ok(())
}

#[test]
fn duplicates_land_next_to_their_source() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let created = peer.engine.create_blocks(&page, &[text("a"), text("b")])?;
    let ids: Vec<RecordId> = created[&BlockType::Text].iter().map(|c| c.block_id().clone()).collect();
    let sent = peer.server().transactions();

    let copies = peer.engine.duplicate_block(&ids[0], 2, &[Position::Index(0)])?;
    let copies: Vec<RecordId> = copies[&BlockType::Text].iter().map(|c| c.block_id().clone()).collect();
    assert_eq!(peer.server().transactions(), sent + 1);
    assert_eq!(
        peer.engine.store().block(&page).unwrap().content,
        vec![copies[0].clone(), ids[0].clone(), copies[1].clone(), ids[1].clone()]
    );

    let copy = peer.engine.store().block(&copies[1]).unwrap();
    assert_eq!(copy.title(), "a");
    assert_eq!(copy.parent_id, page);
    assert_eq!(copy.extra["copied_from"], json!(ids[0]));
    assert_eq!(peer.server().content_of(Table::Block, &page, "content").len(), 4);
    Ok(())
}

#[test]
fn duplicated_root_pages_stay_at_the_root() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let space = peer.space_id();
    let page = peer.create_page("Home")?;
    peer.engine.create_blocks(&page, &[text("inside")])?;

    let copy = first_of(&peer.engine.duplicate_block(&page, 1, &[])?, BlockType::Page)?;
    assert_eq!(peer.engine.store().workspace(&space).unwrap().pages, vec![page, copy.clone()]);
    let copy = peer.engine.store().block(&copy).unwrap();
    assert!(copy.content.is_empty());
    assert_eq!(copy.permissions.len(), 1);

    let (database, _, _) = peer.create_database(
        "Tasks",
        vec![SchemaUnit::new("Name", SchemaType::Title)],
        vec![ViewSpec::new("All", ViewOptions::table())],
    )?;
    let err = peer.engine.duplicate_block(&database, 1, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    Ok(())
}

// ============================================================================
// Deletes
// ============================================================================

#[test]
fn deleted_blocks_are_unlisted_and_evicted() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let created = peer.engine.create_blocks(&page, &[text("keep"), text("drop")])?;
    let ids: Vec<RecordId> = created[&BlockType::Text].iter().map(|c| c.block_id().clone()).collect();

    peer.engine.delete_blocks(&page, &[ids[1].clone()])?;

    assert_eq!(peer.engine.store().block(&page).unwrap().content, vec![ids[0].clone()]);
    assert!(peer.engine.store().block(&ids[1]).is_none());
    assert!(!peer.server().is_alive(Table::Block, &ids[1]));

    let err = peer.engine.delete_blocks(&page, &["stranger".into()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    Ok(())
}

#[test]
fn deleted_root_pages_leave_the_listing() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let space = peer.space_id();
    let ids = root_pages(&mut peer, &["a", "b"])?;

    peer.engine.delete_root_pages(&space, &[ids[0].clone()])?;

    let remaining: Vec<RecordId> = peer.engine.root_pages(&space)?.into_iter().map(|b| b.id).collect();
    assert_eq!(remaining, vec![ids[1].clone()]);
    Ok(())
}

#[test]
fn deleted_templates_and_views_are_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let (block_id, collection_id, views) = peer.create_database(
        "Tasks",
        vec![SchemaUnit::new("Name", SchemaType::Title)],
        vec![
            ViewSpec::new("All", ViewOptions::table()),
            ViewSpec::new("Cards", ViewOptions::List),
        ],
    )?;
    let template = first_of(
        &peer.engine.create_templates(&collection_id, &[BlockSpec::page("tpl", vec![])])?,
        BlockType::Page,
    )?;

    peer.engine.delete_templates(&collection_id, &[template])?;
    assert!(peer.engine.templates(&collection_id)?.is_empty());

    let table_view = views[&ViewKind::Table][0].clone();
    peer.engine.delete_views(&block_id, &[table_view.clone()])?;
    let remaining = peer.engine.views(&block_id)?;
    assert!(!remaining.contains_key(&ViewKind::Table));
    assert_eq!(remaining[&ViewKind::List].len(), 1);
    assert!(peer.engine.store().view(&table_view).is_none());
    Ok(())
}
