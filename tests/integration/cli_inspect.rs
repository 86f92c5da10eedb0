#![allow(missing_docs)]

mod common;

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{open_env, seed_main_fork};
use pageredo::wal::segment_file_name;
use pageredo::{Lsn, RelFileNode, TimeLineId};
use tempfile::tempdir;

const SEG: u64 = 1024 * 1024;

#[test]
fn forks_and_page_report_seeded_relation() {
    let dir = tempdir().expect("tempdir");
    let data_dir = dir.path().join("cluster");
    {
        let env = open_env(&data_dir, |_| {}).expect("env");
        let mut session = env.session(0);
        seed_main_fork(&mut session, RelFileNode::new(1663, 5, 60000), 3, Lsn(0x1_0000_0040), &[])
            .expect("seed");
    }
    let config = dir.path().join("redo.toml");
    fs::write(&config, "data_dir = \"cluster\"\nverify_checksums = true\n").expect("config");

    let output = cargo_bin_cmd!("pageredo-inspect")
        .env("PAGEREDO_CONFIG", &config)
        .args(["--plain", "forks", "1663/5/60000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("3 blocks"), "{text}");
    assert!(text.contains("missing"), "{text}");

    let output = cargo_bin_cmd!("pageredo-inspect")
        .env("PAGEREDO_CONFIG", &config)
        .args(["--plain", "page", "1663/5/60000", "--block", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("1/40"), "{text}");
    assert!(text.contains("checksum ok: true"), "{text}");
}

#[test]
fn wal_page_reports_valid_prefix() {
    let dir = tempdir().expect("tempdir");
    let wal_dir = dir.path().join("pg_xlog");
    fs::create_dir_all(&wal_dir).expect("wal dir");
    fs::write(
        wal_dir.join(segment_file_name(TimeLineId(1), 0, SEG)),
        vec![0xABu8; SEG as usize],
    )
    .expect("segment");
    let config = dir.path().join("redo.toml");
    fs::write(&config, format!("wal_segment_size = {SEG}\n")).expect("config");

    let output = cargo_bin_cmd!("pageredo-inspect")
        .env("PAGEREDO_CONFIG", &config)
        .args(["--plain", "wal-page", "--lsn", "0/2010", "--upto", "0/2100", "--dump"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("valid bytes: 256"), "{text}");
    assert!(text.contains("00002000 abababab"), "{text}");
}

#[test]
fn inspecting_missing_data_dir_leaves_it_absent() {
    let dir = tempdir().expect("tempdir");
    let data_dir = dir.path().join("typo");

    let output = cargo_bin_cmd!("pageredo-inspect")
        .arg("--plain")
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["forks", "1663/5/60000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert_eq!(text.matches("missing").count(), 4, "{text}");

    cargo_bin_cmd!("pageredo-inspect")
        .arg("--plain")
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["page", "1663/5/60000", "--block", "0"])
        .assert()
        .failure();
    assert!(!data_dir.exists());
}

#[test]
fn malformed_relation_is_rejected() {
    cargo_bin_cmd!("pageredo-inspect")
        .args(["--plain", "forks", "not-a-relation"])
        .assert()
        .failure();
}
