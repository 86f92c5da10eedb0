#![allow(missing_docs)]

mod common;

use common::{initialized_page, open_env, seed_main_fork, PAGE};
use pageredo::primitives::page;
use pageredo::wal::{DecodedBlock, DecodedRecord};
use pageredo::{
    ForkNumber, Lsn, PageKey, ReadBufferMode, ReadMethod, RedoAction, RedoError, RelFileNode,
    Result,
};
use tempfile::tempdir;

const NODE: RelFileNode = RelFileNode::new(1663, 5, 16384);

fn record(end: u64, block: u32) -> DecodedRecord {
    DecodedRecord::new(Lsn(end)).with_block(0, DecodedBlock::new(NODE, ForkNumber::Main, block))
}

#[test]
fn existing_block_is_done_or_needs_redo() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    seed_main_fork(&mut session, NODE, 5, Lsn(0x500), &[])?;

    for method in [ReadMethod::Shared, ReadMethod::Local, ReadMethod::Direct] {
        let (action, page) =
            session.apply_or_skip(&record(0x400, 2), 0, ReadBufferMode::Normal, false, method)?;
        assert_eq!(action, RedoAction::Done);
        assert!(page.is_none());

        let (action, page) =
            session.apply_or_skip(&record(0x600, 2), 0, ReadBufferMode::Normal, false, method)?;
        assert_eq!(action, RedoAction::NeedsRedo);
        let page = page.expect("page held for redo");
        assert_eq!(page.page_lsn(), Lsn(0x500));
        assert_eq!(page.replay_lsn(), Lsn(0x600));
        page.release()?;
    }
    assert!(!session.tracker().has_unresolved());
    Ok(())
}

#[test]
fn block_past_end_is_tracked_as_missing() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    seed_main_fork(&mut session, NODE, 5, Lsn(0x500), &[])?;

    let (action, page) = session.apply_or_skip(
        &record(0x600, 10),
        0,
        ReadBufferMode::Normal,
        false,
        ReadMethod::Shared,
    )?;
    assert_eq!(action, RedoAction::NotFound);
    assert!(page.is_none());
    let entries = session.tracker().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, PageKey::new(NODE, ForkNumber::Main, 10));
    assert!(!entries[0].present);
    Ok(())
}

#[test]
fn blank_block_is_tracked_as_present() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    seed_main_fork(&mut session, NODE, 5, Lsn(0x500), &[3])?;

    let (action, _) = session.apply_or_skip(
        &record(0x600, 3),
        0,
        ReadBufferMode::Normal,
        false,
        ReadMethod::Local,
    )?;
    assert_eq!(action, RedoAction::NotFound);
    let entries = session.tracker().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key.block, 3);
    assert!(entries[0].present);
    Ok(())
}

#[test]
fn image_hole_is_zero_filled() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);

    let mut source = initialized_page(Lsn(0x10));
    for (i, byte) in source.iter_mut().enumerate().skip(124) {
        *byte = (i % 251) as u8 | 1;
    }
    let mut image = source[..24].to_vec();
    image.extend_from_slice(&source[124..]);
    let rec = DecodedRecord::new(Lsn(0x900)).with_block(
        0,
        DecodedBlock::new(NODE, ForkNumber::Main, 0).with_image(image.clone(), 24, 100),
    );

    let (action, page) =
        session.apply_or_skip(&rec, 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
    assert_eq!(action, RedoAction::Restored);
    let page = page.expect("restored page");
    let data = page.data();
    assert_eq!(data.len(), PAGE);
    assert!(data[24..124].iter().all(|&b| b == 0));
    assert_eq!(&data[124..], &image[24..]);
    // Only the LSN and flag bytes differ from the image.
    assert_eq!(&data[14..24], &image[14..24]);
    assert_eq!(page.page_lsn(), Lsn(0x900));
    assert!(page::is_just_after_fpw(data));
    page.release()?;
    Ok(())
}

#[test]
fn replay_twice_converges() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    seed_main_fork(&mut session, NODE, 2, Lsn(0x100), &[])?;

    let rec = record(0x200, 1);
    let apply = |session: &mut pageredo::RedoSession| -> Result<RedoAction> {
        let (action, page) =
            session.apply_or_skip(&rec, 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
        if let Some(mut page) = page {
            let bumped = page.data()[4000].wrapping_add(1);
            page.data_mut()[4000] = bumped;
            page.set_page_lsn(page.replay_lsn());
            page.mark_dirty();
            page.release()?;
        }
        Ok(action)
    };
    assert_eq!(apply(&mut session)?, RedoAction::NeedsRedo);
    assert_eq!(apply(&mut session)?, RedoAction::Done);
    session.sync_all_buffers()?;

    let mut disk = vec![0u8; PAGE];
    env.smgr()
        .open(NODE, pageredo::types::INVALID_BACKEND_ID)
        .read_block(ForkNumber::Main, 1, &mut disk)?;
    assert_eq!(disk[4000], 1);
    assert_eq!(page::lsn(&disk), Lsn(0x200));
    Ok(())
}

#[test]
fn init_fork_image_is_flushed_immediately() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut session = env.session(0);
    let rec = DecodedRecord::new(Lsn(0x300)).with_block(
        0,
        DecodedBlock::new(NODE, ForkNumber::Init, 0).with_image(initialized_page(Lsn(1)), 0, 0),
    );
    let (action, page) =
        session.apply_or_skip(&rec, 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
    assert_eq!(action, RedoAction::Restored);

    // Durable before the page is even released.
    let storage = env.smgr().open(NODE, pageredo::types::INVALID_BACKEND_ID);
    let mut disk = vec![0u8; PAGE];
    storage.read_block(ForkNumber::Init, 0, &mut disk)?;
    assert_eq!(page::lsn(&disk), Lsn(0x300));
    assert_eq!(storage.sync_count(), 1);
    page.expect("restored page is returned").release()?;
    Ok(())
}

#[test]
fn end_of_recovery_check_honors_override() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let strict = open_env(&dir.path().join("strict"), |_| {})?;
    let mut session = strict.session(0);
    session.apply_or_skip(&record(0x10, 7), 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
    assert!(matches!(
        session.check_and_consume(),
        Err(RedoError::InvalidPages(1))
    ));

    let lenient = open_env(&dir.path().join("lenient"), |options| {
        options.ignore_invalid_pages = true;
    })?;
    let mut session = lenient.session(0);
    session.apply_or_skip(&record(0x10, 7), 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
    assert_eq!(session.check_and_consume()?, 1);
    assert!(!session.tracker().has_unresolved());
    Ok(())
}
