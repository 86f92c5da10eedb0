#![allow(missing_docs)]

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::open_env;
use pageredo::wal::{segment_file_name, LocalWalPageReader, SegmentFileReader, WalAvailability};
use pageredo::{Lsn, RedoError, Result, TimeLineId};
use tempfile::tempdir;

const SEG: u64 = 1024 * 1024;
const WAL_PAGE: usize = 8192;

fn byte_at(timeline: u32, pos: u64) -> u8 {
    (pos.wrapping_mul(31).wrapping_add(timeline as u64) % 256) as u8
}

fn write_segment(wal_dir: &Path, timeline: u32, seg_no: u64) {
    fs::create_dir_all(wal_dir).expect("wal dir");
    let data: Vec<u8> = (0..SEG).map(|off| byte_at(timeline, seg_no * SEG + off)).collect();
    fs::write(
        wal_dir.join(segment_file_name(TimeLineId(timeline), seg_no, SEG)),
        data,
    )
    .expect("write segment");
}

#[test]
fn session_reads_across_segments_and_timelines() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let env = open_env(dir.path(), |options| options.wal_segment_size = SEG)?;
    let wal_dir = env.wal_dir();
    write_segment(&wal_dir, 1, 0);
    write_segment(&wal_dir, 1, 1);
    write_segment(&wal_dir, 2, 1);

    let mut session = env.session(0);
    let start = SEG - 5000;
    let mut buf = vec![0u8; 12_000];
    session.read_wal(&mut buf, TimeLineId(1), Lsn(start))?;
    for (i, &byte) in buf.iter().enumerate() {
        assert_eq!(byte, byte_at(1, start + i as u64), "offset {i}");
    }

    let mut small = [0u8; 64];
    session.read_wal(&mut small, TimeLineId(2), Lsn(SEG + 128))?;
    assert_eq!(small[0], byte_at(2, SEG + 128));

    let err = session
        .read_wal(&mut small, TimeLineId(1), Lsn(3 * SEG))
        .unwrap_err();
    match err {
        RedoError::SegmentRemoved(path) => {
            assert!(path.ends_with(segment_file_name(TimeLineId(1), 3, SEG)));
        }
        other => panic!("unexpected error: {other}"),
    }
    session.close_wal();
    Ok(())
}

#[test]
fn page_reader_follows_flush_position() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let wal_dir = dir.path().join("pg_xlog");
    write_segment(&wal_dir, 1, 0);

    let availability = Arc::new(WalAvailability::new(Lsn(0), TimeLineId(1)));
    let mut reader = LocalWalPageReader::new(
        SegmentFileReader::new(&wal_dir, SEG),
        Arc::clone(&availability),
        WAL_PAGE,
        Duration::from_secs(5),
    );
    let feeder = {
        let availability = Arc::clone(&availability);
        thread::spawn(move || {
            for step in 1..=4u64 {
                thread::sleep(Duration::from_millis(5));
                availability.advance(Lsn(step * 3000), TimeLineId(1));
            }
        })
    };

    let mut buf = vec![0xFFu8; WAL_PAGE];
    let valid = reader.read_page(Lsn(WAL_PAGE as u64), 100, &mut buf)?;
    feeder.join().expect("feeder panicked");
    assert!(valid >= 100 && valid <= WAL_PAGE);
    assert_eq!(buf[0], byte_at(1, WAL_PAGE as u64));
    assert!(buf[valid..].iter().all(|&b| b == 0));

    assert_eq!(reader.read_page(Lsn(0), 24, &mut buf)?, WAL_PAGE);
    reader.close();
    Ok(())
}
