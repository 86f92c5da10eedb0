#![allow(missing_docs)]

mod common;

use std::sync::mpsc;
use std::thread;

use common::open_env;
use pageredo::wal::{DecodedBlock, DecodedRecord};
use pageredo::{
    ForkNumber, InvalidPageMerge, Lsn, ReadBufferMode, ReadMethod, RedoAction, RedoError,
    RelFileNode, Result, WorkerHandOff,
};
use tempfile::tempdir;

fn replay_missing(
    session: &mut pageredo::RedoSession,
    node: RelFileNode,
    blocks: &[u32],
) -> Result<()> {
    for (i, &block) in blocks.iter().enumerate() {
        let record = DecodedRecord::new(Lsn(0x1000 + i as u64))
            .with_block(0, DecodedBlock::new(node, ForkNumber::Main, block));
        let (action, _) =
            session.apply_or_skip(&record, 0, ReadBufferMode::Normal, false, ReadMethod::Local)?;
        assert_eq!(action, RedoAction::NotFound);
    }
    Ok(())
}

fn run_workers(ignore: bool) -> Result<usize> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |options| options.ignore_invalid_pages = ignore)?;
    let shared = RelFileNode::new(1663, 5, 40000);
    let (tx, rx) = mpsc::channel::<WorkerHandOff>();
    let handles: Vec<_> = (0..3usize)
        .map(|worker| {
            let env = std::sync::Arc::clone(&env);
            let tx = tx.clone();
            thread::spawn(move || -> Result<()> {
                let mut session = env.session(worker);
                let own = RelFileNode::new(1663, 5, 41000 + worker as u32);
                replay_missing(&mut session, shared, &[3, 4])?;
                replay_missing(&mut session, own, &[worker as u32, 50])?;
                // The worker's own relation later shrinks below block 50.
                session.truncate_heap(own, 10)?;
                tx.send(session.hand_over()).expect("coordinator alive");
                assert!(!session.tracker().has_unresolved());
                Ok(())
            })
        })
        .collect();
    drop(tx);
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    let mut merge = InvalidPageMerge::new(3);
    for hand_off in rx {
        assert_eq!(hand_off.table.reported(), 4);
        merge.collect(hand_off)?;
    }
    assert_eq!(merge.pending(), 0);
    merge.finish(env.options().ignore_invalid_pages)
}

#[test]
fn merged_tables_fail_once() {
    let err = run_workers(false).unwrap_err();
    // Shared blocks 3 and 4 once, plus block `worker` of each worker's relation.
    assert!(matches!(err, RedoError::InvalidPages(5)));
}

#[test]
fn merged_tables_downgrade_under_override() -> Result<()> {
    assert_eq!(run_workers(true)?, 5);
    Ok(())
}

#[test]
fn merge_refuses_to_finish_early() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |_| {})?;
    let mut first = env.session(0);
    let second = env.session(1);
    replay_missing(&mut first, RelFileNode::new(1663, 5, 42000), &[1])?;

    let mut merge = InvalidPageMerge::new(2);
    merge.collect(first.hand_over())?;
    assert_eq!(merge.pending(), 1);
    assert!(matches!(
        merge.finish(false),
        Err(RedoError::WorkersStillRunning { pending: 1 })
    ));
    drop(second);
    Ok(())
}
