#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{initialized_page, open_env, seed_main_fork, PAGE};
use pageredo::primitives::page;
use pageredo::redo::{fsm_blocks_for_heap, vm_blocks_for_heap};
use pageredo::types::INVALID_BACKEND_ID;
use pageredo::{
    ForkNumber, Lsn, PageKey, ReadBufferMode, ReadMethod, RedoError, RelFileNode, Result,
};
use tempfile::tempdir;

const NODE: RelFileNode = RelFileNode::new(1663, 5, 24576);

#[test]
fn zero_mode_extension_addresses_exact_block() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    for (i, method) in [ReadMethod::Shared, ReadMethod::Local, ReadMethod::Direct]
        .into_iter()
        .enumerate()
    {
        let node = RelFileNode::new(1663, 5, 30000 + i as u32);
        for target in [0u32, 4, 2, 9] {
            let key = PageKey::new(node, ForkNumber::Main, target);
            let page = session
                .resolve(key, ReadBufferMode::ZeroAndCleanupLock, false, method)?
                .expect("zero mode returns a page");
            assert_eq!(page.block(), key);
            page.release()?;
        }
        let nblocks = env
            .smgr()
            .open(node, INVALID_BACKEND_ID)
            .nblocks(ForkNumber::Main)?;
        assert_eq!(nblocks, 10);
    }
    assert!(!env.extension_locks().is_locked(NODE));
    Ok(())
}

#[test]
fn concurrent_extension_never_duplicates_blocks() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let env = Arc::clone(&env);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<u32> {
                let mut session = env.session(worker);
                barrier.wait();
                let key = PageKey::new(NODE, ForkNumber::Main, 7);
                let mut page = session
                    .resolve(key, ReadBufferMode::ZeroAndLock, false, ReadMethod::Shared)?
                    .expect("zero mode returns a page");
                page.data_mut()[PAGE - 1] = worker as u8 + 1;
                page.mark_dirty();
                let block = page.block().block;
                page.release()?;
                Ok(block)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("worker panicked")?, 7);
    }
    let nblocks = env
        .smgr()
        .open(NODE, INVALID_BACKEND_ID)
        .nblocks(ForkNumber::Main)?;
    assert!(nblocks >= 8);
    let locks = env.extension_locks().snapshot();
    assert_eq!(locks.held, 0);
    assert!(locks.acquisitions >= 1);
    Ok(())
}

#[test]
fn zero_on_error_replaces_damaged_page() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    let rel = env.smgr().open(NODE, INVALID_BACKEND_ID);
    let mut damaged = initialized_page(Lsn(0x40));
    page::stamp_checksum(0, &mut damaged);
    damaged[PAGE / 2] ^= 0xFF;
    rel.extend(ForkNumber::FreeSpaceMap, 0, &damaged)?;

    let key = PageKey::new(NODE, ForkNumber::FreeSpaceMap, 0);
    let err = session
        .resolve(key, ReadBufferMode::Normal, false, ReadMethod::Direct)
        .unwrap_err();
    assert!(matches!(err, RedoError::Corruption(_)));

    let page = session
        .resolve(key, ReadBufferMode::ZeroOnError, false, ReadMethod::Direct)?
        .expect("zero-on-error returns a page");
    assert!(page.data().iter().all(|&b| b == 0));
    page.release()?;

    // Past the end it extends like the zero modes.
    let far = PageKey::new(NODE, ForkNumber::FreeSpaceMap, 3);
    let page = session
        .resolve(far, ReadBufferMode::ZeroOnError, false, ReadMethod::Local)?
        .expect("extended");
    assert_eq!(page.block(), far);
    page.release()?;
    assert_eq!(rel.nblocks(ForkNumber::FreeSpaceMap)?, 4);
    Ok(())
}

#[test]
fn truncate_heap_fans_out_to_map_forks() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    seed_main_fork(&mut session, NODE, 6, Lsn(0x100), &[])?;
    for (fork, last) in [(ForkNumber::FreeSpaceMap, 4), (ForkNumber::VisibilityMap, 2)] {
        session
            .resolve(PageKey::new(NODE, fork, last), ReadBufferMode::ZeroOnError, false, ReadMethod::Shared)?
            .expect("extended")
            .release()?;
    }
    for (fork, block) in [
        (ForkNumber::Main, 1),
        (ForkNumber::Main, 8),
        (ForkNumber::FreeSpaceMap, 2),
        (ForkNumber::FreeSpaceMap, 6),
        (ForkNumber::VisibilityMap, 0),
        (ForkNumber::VisibilityMap, 5),
    ] {
        session.log_invalid_page(PageKey::new(NODE, fork, block), false);
    }

    let outcome = session.truncate_heap(NODE, 2)?;
    assert_eq!(outcome.main_blocks, 2);
    assert_eq!(outcome.fsm_blocks, fsm_blocks_for_heap(2, PAGE));
    assert_eq!(outcome.vm_blocks, vm_blocks_for_heap(2, PAGE));
    assert_eq!(outcome.forgotten, 3);

    let rel = env.smgr().open(NODE, INVALID_BACKEND_ID);
    assert_eq!(rel.nblocks(ForkNumber::Main)?, 2);
    assert_eq!(rel.nblocks(ForkNumber::FreeSpaceMap)?, 3);
    assert_eq!(rel.nblocks(ForkNumber::VisibilityMap)?, 1);

    let left: Vec<_> = session
        .tracker()
        .entries()
        .into_iter()
        .map(|entry| (entry.key.fork, entry.key.block))
        .collect();
    assert_eq!(
        left,
        vec![
            (ForkNumber::Main, 1),
            (ForkNumber::FreeSpaceMap, 2),
            (ForkNumber::VisibilityMap, 0),
        ]
    );

    // Truncated blocks resolve as missing again.
    let gone = session.resolve(
        PageKey::new(NODE, ForkNumber::Main, 4),
        ReadBufferMode::Normal,
        false,
        ReadMethod::Shared,
    )?;
    assert!(gone.is_none());
    Ok(())
}

#[test]
fn drop_relation_then_database_clears_tracker() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    let other = RelFileNode::new(1663, 6, 24576);
    session.log_invalid_page(PageKey::new(NODE, ForkNumber::Main, 3), false);
    session.log_invalid_page(PageKey::new(NODE, ForkNumber::VisibilityMap, 0), true);
    session.log_invalid_page(PageKey::new(other, ForkNumber::Main, 3), false);

    assert_eq!(session.forget_relation(NODE)?, 2);
    assert!(session.tracker().has_unresolved());
    assert_eq!(session.drop_database(6), 1);
    assert!(!session.tracker().has_unresolved());
    assert_eq!(session.tracker().reported(), 3);
    Ok(())
}
