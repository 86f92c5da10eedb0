#![forbid(unsafe_code)]
//! Page access for replay: a shared buffer pool, a per-worker local cache,
//! and unbuffered direct reads, all behind [`BlockSource`].

use tracing::warn;

use crate::primitives::page;
use crate::storage::StorageManager;
use crate::types::{BlockNumber, ForkNumber, PageKey, RelFileNode, Result, INVALID_BACKEND_ID};

mod direct;
mod frame;
mod local;
mod pool;

pub use direct::{DirectPage, DirectReader};
pub use frame::BufferStats;
pub use local::{LocalBufferCache, LocalPage};
pub use pool::{BufferPool, SharedPage};

/// Identity of a buffered page.
pub type BufferTag = PageKey;

/// Which page access strategy a resolution goes through.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReadMethod {
    /// Shared buffer pool.
    Shared,
    /// The calling worker's local buffer cache.
    Local,
    /// Unbuffered read straight from the fork file.
    Direct,
}

/// Content lock taken on a page handed to a redo routine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Exclusive content lock.
    Exclusive,
    /// Exclusive lock held while no other pin exists on the page.
    Cleanup,
}

/// How page content is produced when a block is fetched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageFill {
    /// Read from disk; checksum failures are errors.
    Read,
    /// Zero-fill; disk content is not read.
    Zero,
    /// Read from disk; a page that fails verification is zero-filled.
    ZeroOnError,
}

/// A pinned, locked page handed to replay code.
///
/// Dropping the handle releases lock and pin. Use [`RedoPage::release`] when
/// write-back errors must be observed. Handles stay on the thread that
/// locked the page.
pub trait RedoPage {
    /// Which page this is.
    fn tag(&self) -> BufferTag;
    /// Page bytes.
    fn data(&self) -> &[u8];
    /// Mutable page bytes.
    fn data_mut(&mut self) -> &mut [u8];
    /// Records that the page must be written back.
    fn mark_dirty(&mut self);
    /// Writes the page to its fork file now.
    fn flush(&mut self) -> Result<()>;
    /// Releases the page, surfacing any pending write-back error.
    fn release(self: Box<Self>) -> Result<()>;
}

/// One page access strategy.
pub trait BlockSource {
    /// Fetches an existing block under `lock`.
    fn read(&self, tag: BufferTag, fill: PageFill, lock: LockMode) -> Result<Box<dyn RedoPage>>;
    /// Appends one zero page to the fork and returns it under `lock`.
    fn extend(&self, node: RelFileNode, fork: ForkNumber, lock: LockMode)
        -> Result<Box<dyn RedoPage>>;
    /// Discards buffered pages of `fork` at or past `first_block` without
    /// writing them. Returns how many were discarded.
    fn drop_relation_buffers(
        &self,
        node: RelFileNode,
        fork: ForkNumber,
        first_block: BlockNumber,
    ) -> Result<usize>;
    /// Writes back every dirty unpinned page. Returns how many were written.
    fn flush_all(&self) -> Result<usize>;
}

pub(crate) fn load_block(
    smgr: &StorageManager,
    tag: BufferTag,
    fill: PageFill,
    dst: &mut [u8],
) -> Result<()> {
    if fill == PageFill::Zero {
        dst.fill(0);
        return Ok(());
    }
    let rel = smgr.open(tag.node, INVALID_BACKEND_ID);
    rel.read_block(tag.fork, tag.block, dst)?;
    if let Err(err) = smgr.verify_page(tag.block, dst) {
        if fill != PageFill::ZeroOnError {
            return Err(err);
        }
        warn!(page = %tag, "buffer.zero_damaged_page");
        dst.fill(0);
    }
    Ok(())
}

pub(crate) fn write_block(smgr: &StorageManager, tag: BufferTag, page_data: &mut [u8]) -> Result<()> {
    if !page::is_new(page_data) {
        page::stamp_checksum(tag.block, page_data);
    }
    smgr.open(tag.node, INVALID_BACKEND_ID)
        .write_block(tag.fork, tag.block, page_data)
}

pub(crate) fn extend_block(
    smgr: &StorageManager,
    node: RelFileNode,
    fork: ForkNumber,
) -> Result<BlockNumber> {
    let rel = smgr.open(node, INVALID_BACKEND_ID);
    let block = rel.nblocks(fork)?;
    rel.extend(fork, block, &vec![0u8; smgr.page_size()])?;
    Ok(block)
}
