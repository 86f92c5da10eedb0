#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use pageredo::primitives::page;
use pageredo::{
    ForkNumber, Lsn, ReadBufferMode, ReadMethod, RedoEnv, RedoOptions, RedoSession, RelFileNode,
    Result,
};
use tracing_subscriber::EnvFilter;

pub const PAGE: usize = 8192;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pageredo=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

pub fn open_env(dir: &Path, tweak: impl FnOnce(&mut RedoOptions)) -> Result<Arc<RedoEnv>> {
    init_tracing();
    let mut options = RedoOptions::with_data_dir(dir);
    options.shared_buffers = 32;
    options.local_buffers = 8;
    tweak(&mut options);
    RedoEnv::open(options)
}

pub fn initialized_page(lsn: Lsn) -> Vec<u8> {
    let mut data = vec![0u8; PAGE];
    page::init(&mut data, 0).expect("page init");
    page::set_lsn(&mut data, lsn);
    data
}

/// Writes `blocks` pages to the main fork of `node`, each initialized and
/// stamped with `lsn`, except the blocks listed in `blank`.
pub fn seed_main_fork(
    session: &mut RedoSession,
    node: RelFileNode,
    blocks: u32,
    lsn: Lsn,
    blank: &[u32],
) -> Result<()> {
    for block in 0..blocks {
        let key = pageredo::PageKey::new(node, ForkNumber::Main, block);
        let mut resolved = session
            .resolve(key, ReadBufferMode::ZeroAndLock, false, ReadMethod::Shared)?
            .expect("zero mode returns a page");
        if !blank.contains(&block) {
            resolved.data_mut().copy_from_slice(&initialized_page(lsn));
        }
        resolved.mark_dirty();
        resolved.release()?;
    }
    session.sync_all_buffers()?;
    Ok(())
}
