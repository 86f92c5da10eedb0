#![allow(missing_docs)]

mod common;

use common::open_env;
use pageredo::storage::StorageRelation;
use pageredo::types::INVALID_BACKEND_ID;
use pageredo::{FakeRelationFactory, ForkNumber, Persistence, RelFileNode, Result};
use tempfile::tempdir;

#[test]
fn stand_in_drives_storage_without_catalog() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let node = RelFileNode::new(1663, 5, 50000);

    let rel = FakeRelationFactory::for_recovery(node);
    assert_eq!(rel.display_name(), "1663/5/50000");
    assert_eq!(rel.backend(), INVALID_BACKEND_ID);
    assert_eq!(rel.persistence(), Persistence::Permanent);

    let storage = rel.open_smgr(env.smgr());
    storage.create(ForkNumber::Main)?;
    storage.extend(ForkNumber::Main, 0, &vec![0u8; env.smgr().page_size()])?;
    assert!(storage.has_owner());
    assert_eq!(rel.smgr().expect("attached").nblocks(ForkNumber::Main)?, 1);

    rel.dispose();
    assert!(!storage.has_owner());
    Ok(())
}

#[test]
fn database_drop_detaches_live_stand_ins() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    let rel = FakeRelationFactory::make(
        RelFileNode::new(1663, 7, 50001),
        INVALID_BACKEND_ID,
        Persistence::Unlogged,
        Some("orders"),
    );
    assert_eq!(rel.display_name(), "orders");
    rel.open_smgr(env.smgr());
    assert!(rel.smgr().is_some());

    session.drop_database(7);
    assert!(rel.smgr().is_none());
    assert_eq!(env.smgr().open_handles(), 0);

    // Reopening after the drop attaches a fresh handle.
    let reopened = rel.open_smgr(env.smgr());
    assert!(reopened.has_owner());
    Ok(())
}
