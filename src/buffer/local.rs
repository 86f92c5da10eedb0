use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock};

use super::frame::{BufferStats, FrameTable};
use super::{extend_block, write_block, BlockSource, BufferTag, LockMode, PageFill, RedoPage};
use crate::storage::StorageManager;
use crate::types::{BlockNumber, ForkNumber, PageKey, RedoError, RelFileNode, Result};

/// Page cache private to one redo worker.
///
/// Only its owning worker touches it, so a page can never be waited on: a
/// second lock or a cleanup request on a page the worker already holds is a
/// usage error.
#[derive(Clone)]
pub struct LocalBufferCache {
    core: Arc<LocalCore>,
}

struct LocalCore {
    smgr: Arc<StorageManager>,
    table: Mutex<FrameTable>,
}

/// Locked page of a [`LocalBufferCache`].
pub struct LocalPage {
    core: Arc<LocalCore>,
    idx: usize,
    tag: BufferTag,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>>,
}

impl LocalBufferCache {
    /// Creates a cache of `capacity` pages.
    pub fn new(smgr: Arc<StorageManager>, capacity: usize) -> Self {
        let page_size = smgr.page_size();
        Self {
            core: Arc::new(LocalCore {
                smgr,
                table: Mutex::new(FrameTable::new(capacity, page_size)),
            }),
        }
    }

    fn read_page(&self, tag: BufferTag, fill: PageFill, lock: LockMode) -> Result<LocalPage> {
        let (idx, buf) = {
            let mut table = self.core.table.lock();
            let idx = match table.pin_resident(&tag) {
                Some(idx) => idx,
                None => table.pin_loaded(&self.core.smgr, tag, fill)?,
            };
            if lock == LockMode::Cleanup && table.frame(idx).pin_count > 1 {
                table.unpin(idx);
                return Err(RedoError::Invalid("cleanup lock on a local buffer pinned twice"));
            }
            (idx, Arc::clone(&table.frame(idx).buf))
        };
        let Some(guard) = buf.try_write_arc() else {
            self.core.table.lock().unpin(idx);
            return Err(RedoError::Invalid("local buffer already locked"));
        };
        let mut page = LocalPage {
            core: Arc::clone(&self.core),
            idx,
            tag,
            guard: Some(guard),
        };
        if fill == PageFill::Zero {
            page.data_mut().fill(0);
        }
        Ok(page)
    }

    /// Returns a snapshot of cache counters.
    pub fn stats(&self) -> BufferStats {
        self.core.table.lock().stats.clone()
    }

    /// Number of dirty pages.
    pub fn dirty(&self) -> usize {
        self.core.table.lock().dirty()
    }
}

impl RedoPage for LocalPage {
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

impl Drop for LocalPage {
    fn drop(&mut self) {
        self.guard.take();
        self.core.table.lock().unpin(self.idx);
    }
}

impl BlockSource for LocalBufferCache {
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
        Ok(Box::new(self.read_page(
            PageKey::new(node, fork, block),
            PageFill::Zero,
            lock,
        )?))
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
