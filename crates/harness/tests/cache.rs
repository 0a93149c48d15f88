use docgraph_core::{BlockSpec, BlockType, Record, RecordId, Table};
use docgraph_engine::{Engine, EngineConfig, ErrorKind};
use docgraph_harness::{FakeRemote, SPACE_ID, SPACE_VIEW_ID, SequentialIds, TestPeer, USER_ID};
use docgraph_storage::{IdRef, RecordStore};
use serde_json::json;

fn remote_with_root_page(page: &str) -> FakeRemote {
    let mut remote = FakeRemote::seeded();
    remote.insert(
        Table::Block,
        json!({
            "id": page,
            "type": "page",
            "properties": { "title": [["Written elsewhere"]] },
            "parent_id": SPACE_ID,
            "parent_table": "space",
        }),
    );
    remote.insert(
        Table::Workspace,
        json!({ "id": SPACE_ID, "name": "Workspace", "pages": [page] }),
    );
    remote
}

#[test]
fn bootstrap_loads_user_and_workspace_records() -> Result<(), Box<dyn std::error::Error>> {
    let peer = TestPeer::new()?;
    let store = peer.engine.store();

    assert!(store.user(&USER_ID.into()).is_some());
    assert_eq!(store.user_root(&USER_ID.into()).unwrap().space_views, vec![RecordId::from(SPACE_VIEW_ID)]);
    assert!(store.workspace(&SPACE_ID.into()).is_some());
    assert_eq!(store.workspace_view(&SPACE_VIEW_ID.into()).unwrap().space_id, RecordId::from(SPACE_ID));
    assert_eq!(store.len(Table::Block), 0);
    Ok(())
}

#[test]
fn cached_records_are_not_fetched_again() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::with_remote(remote_with_root_page("elsewhere"))?;
    let space = peer.space_id();
    let before = peer.server().fetched_refs();

    let pages = peer.engine.root_pages(&space)?;
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].title(), "Written elsewhere");
    assert_eq!(peer.server().fetched_refs(), before + 1);

    peer.engine.root_pages(&space)?;
    let refs = [IdRef::from(RecordId::from("elsewhere")), IdRef::new(&space, Table::Workspace)];
    assert_eq!(peer.engine.ensure_present(&refs)?, 0);
    assert_eq!(peer.server().fetched_refs(), before + 1);
    Ok(())
}

#[test]
fn refresh_replaces_stale_records_and_evicts_dead_ones() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::with_remote(remote_with_root_page("elsewhere"))?;
    let page = RecordId::from("elsewhere");
    peer.engine.ensure_present(&[IdRef::from(page.clone())])?;

    peer.server_mut().insert(
        Table::Block,
        json!({ "id": "elsewhere", "type": "page", "version": 7, "properties": { "title": [["Renamed"]] } }),
    );
    assert_eq!(peer.engine.store().block(&page).unwrap().title(), "Written elsewhere");
    peer.engine.force_refresh(&[IdRef::from(page.clone())])?;
    let block = peer.engine.store().block(&page).unwrap();
    assert_eq!((block.title().as_str(), block.version), ("Renamed", 7));

    peer.server_mut()
        .insert(Table::Block, json!({ "id": "elsewhere", "type": "page", "alive": false }));
    peer.engine.force_refresh(&[IdRef::from(page.clone())])?;
    assert!(peer.engine.store().block(&page).is_none());
    Ok(())
}

#[test]
fn cache_matches_server_versions_after_a_write() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;

    let cached = peer.engine.store().get(Table::Block, &page).map(Record::version);
    let remote = peer.server().get(Table::Block, &page).map(|r| r.version());
    assert_eq!(cached, Some(1));
    assert_eq!(cached, remote);

    let space = peer.space_id();
    let cached = peer.engine.store().workspace(&space).map(|w| w.version);
    let remote = peer.server().get(Table::Workspace, &space).map(|r| r.version());
    assert_eq!(cached, remote);
    Ok(())
}

#[test]
fn transport_failure_leaves_the_cache_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let snapshot = peer.engine.store().to_subtree()?;
    let sent = peer.server().transactions();

    peer.server_mut().fail_next_sends(1);
    let err = peer
        .engine
        .create_blocks(&page, &[BlockSpec::basic(BlockType::Text, "lost")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(peer.engine.store().to_subtree()?, snapshot);
    assert_eq!(peer.server().transactions(), sent);

    peer.engine
        .create_blocks(&page, &[BlockSpec::basic(BlockType::Text, "kept")])?;
    assert_eq!(peer.engine.store().block(&page).unwrap().content.len(), 1);
    Ok(())
}

#[test]
fn writes_skip_the_refresh_when_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig {
        request_interval_ms: 0,
        refresh_after_write: false,
        ..EngineConfig::new(USER_ID, SPACE_ID)
    };
    let mut engine = Engine::with_id_generator(config, FakeRemote::seeded(), Box::new(SequentialIds::default()));
    engine.bootstrap()?;
    let space = RecordId::from(SPACE_ID);
    let fetched = engine.remote().fetched_refs();

    engine.create_root_pages(&space, &[BlockSpec::page("Quiet", vec![])])?;
    assert_eq!(engine.remote().fetched_refs(), fetched);
    assert_eq!(engine.remote().transactions(), 1);
    // The transaction response still lands in the cache.
    assert_eq!(engine.store().workspace(&space).unwrap().pages.len(), 1);
    Ok(())
}

#[test]
fn every_structural_call_is_one_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut peer = TestPeer::new()?;
    let page = peer.create_page("Home")?;
    let other = peer.create_page("Other")?;
    assert_eq!(peer.server().transactions(), 2);

    let blocks = peer.engine.create_blocks(
        &page,
        &[
            BlockSpec::basic(BlockType::Text, "a"),
            BlockSpec::basic(BlockType::Quote, "b"),
            BlockSpec::page("c", vec![BlockSpec::basic(BlockType::Divider, "")]),
        ],
    )?;
    assert_eq!(peer.server().transactions(), 3);

    let quote = blocks[&BlockType::Quote][0].block_id().clone();
    peer.engine.transfer(&quote, &other)?;
    peer.engine.delete_blocks(&other, &[quote])?;
    assert_eq!(peer.server().transactions(), 5);
    Ok(())
}
