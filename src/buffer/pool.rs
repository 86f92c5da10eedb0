use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Condvar, Mutex, RawRwLock};
use tracing::trace;

use super::frame::{BufferStats, FrameTable};
use super::{extend_block, write_block, BlockSource, BufferTag, LockMode, PageFill, RedoPage};
use crate::storage::StorageManager;
use crate::types::{BlockNumber, ForkNumber, PageKey, RelFileNode, Result};

type PageGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Buffer pool shared by every redo worker.
#[derive(Clone)]
pub struct BufferPool {
    core: Arc<PoolCore>,
}

struct PoolCore {
    smgr: Arc<StorageManager>,
    table: Mutex<FrameTable>,
    unpinned: Condvar,
}

/// Pinned, locked page of the shared pool.
pub struct SharedPage {
    core: Arc<PoolCore>,
    idx: usize,
    tag: BufferTag,
    guard: Option<PageGuard>,
}

impl BufferPool {
    /// Creates a pool of `capacity` pages over `smgr`.
    pub fn new(smgr: Arc<StorageManager>, capacity: usize) -> Self {
        let page_size = smgr.page_size();
        Self {
            core: Arc::new(PoolCore {
                smgr,
                table: Mutex::new(FrameTable::new(capacity, page_size)),
                unpinned: Condvar::new(),
            }),
        }
    }

    /// Pins and locks `tag`, loading it if it is not resident.
    pub fn read_page(&self, tag: BufferTag, fill: PageFill, lock: LockMode) -> Result<SharedPage> {
        let idx = {
            let mut table = self.core.table.lock();
            match table.pin_resident(&tag) {
                Some(idx) => idx,
                None => table.pin_loaded(&self.core.smgr, tag, fill)?,
            }
        };
        let mut page = SharedPage {
            core: Arc::clone(&self.core),
            idx,
            tag,
            guard: None,
        };
        page.guard = Some(self.core.lock_frame(idx, lock));
        if fill == PageFill::Zero {
            page.data_mut().fill(0);
        }
        Ok(page)
    }

    /// Returns a snapshot of pool counters.
    pub fn stats(&self) -> BufferStats {
        self.core.table.lock().stats.clone()
    }

    /// Number of resident pages.
    pub fn resident(&self) -> usize {
        self.core.table.lock().resident()
    }

    /// Number of dirty pages.
    pub fn dirty(&self) -> usize {
        self.core.table.lock().dirty()
    }

    /// Current pin count of `tag`, zero if not resident.
    pub fn pin_count(&self, tag: &PageKey) -> u32 {
        self.core.table.lock().pins(tag)
    }
}

impl PoolCore {
    fn lock_frame(&self, idx: usize, lock: LockMode) -> PageGuard {
        let buf = Arc::clone(&self.table.lock().frame(idx).buf);
        loop {
            let guard = buf.write_arc();
            if lock == LockMode::Exclusive {
                return guard;
            }
            let mut table = self.table.lock();
            if table.frame(idx).pin_count == 1 {
                return guard;
            }
            drop(guard);
            trace!(frame = idx, "buffer.cleanup_lock.wait");
            self.unpinned.wait(&mut table);
        }
    }

    fn release(&self, idx: usize) {
        let mut table = self.table.lock();
        table.unpin(idx);
        self.unpinned.notify_all();
    }
}

impl RedoPage for SharedPage {
    fn tag(&self) -> BufferTag {
        self.tag
    }

    fn data(&self) -> &[u8] {
        self.guard.as_ref().map(|guard| &guard[..]).unwrap_or(&[])
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.guard
            .as_mut()
            .map(|guard| &mut guard[..])
            .unwrap_or(&mut [])
    }

    fn mark_dirty(&mut self) {
        self.core.table.lock().frame_mut(self.idx).dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(guard) = self.guard.as_mut() {
            write_block(&self.core.smgr, self.tag, guard)?;
        }
        let mut table = self.core.table.lock();
        table.frame_mut(self.idx).dirty = false;
        table.stats.writebacks += 1;
        Ok(())
    }

    fn release(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for SharedPage {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
        }
        self.core.release(self.idx);
    }
}

impl BlockSource for BufferPool {
    fn read(&self, tag: BufferTag, fill: PageFill, lock: LockMode) -> Result<Box<dyn RedoPage>> {
        Ok(Box::new(self.read_page(tag, fill, lock)?))
    }

    fn extend(
        &self,
        node: RelFileNode,
        fork: ForkNumber,
        lock: LockMode,
    ) -> Result<Box<dyn RedoPage>> {
        let block = extend_block(&self.core.smgr, node, fork)?;
        let tag = PageKey::new(node, fork, block);
        Ok(Box::new(self.read_page(tag, PageFill::Zero, lock)?))
    }

    fn drop_relation_buffers(
        &self,
        node: RelFileNode,
        fork: ForkNumber,
        first_block: BlockNumber,
    ) -> Result<usize> {
        self.core.table.lock().drop_range(node, fork, first_block)
    }

    fn flush_all(&self) -> Result<usize> {
        self.core.table.lock().flush_unpinned(&self.core.smgr)
    }
}
