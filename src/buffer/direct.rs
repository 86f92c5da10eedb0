use std::sync::Arc;

use tracing::error;

use super::{extend_block, load_block, write_block, BlockSource, BufferTag, LockMode, PageFill, RedoPage};
use crate::storage::StorageManager;
use crate::types::{BlockNumber, ForkNumber, PageKey, RelFileNode, Result};

/// Unbuffered page access.
///
/// Each page is a private copy read straight from the fork file and written
/// back when released dirty. Nothing is shared, so lock modes are satisfied
/// trivially.
#[derive(Clone)]
pub struct DirectReader {
    smgr: Arc<StorageManager>,
}

/// Private page copy handed out by [`DirectReader`].
pub struct DirectPage {
    smgr: Arc<StorageManager>,
    tag: BufferTag,
    data: Box<[u8]>,
    dirty: bool,
}

impl DirectReader {
    /// Creates a reader over `smgr`.
    pub fn new(smgr: Arc<StorageManager>) -> Self {
        Self { smgr }
    }

    fn read_page(&self, tag: BufferTag, fill: PageFill) -> Result<DirectPage> {
        let mut data = vec![0u8; self.smgr.page_size()].into_boxed_slice();
        load_block(&self.smgr, tag, fill, &mut data)?;
        Ok(DirectPage {
            smgr: Arc::clone(&self.smgr),
            tag,
            data,
            dirty: false,
        })
    }
}

impl DirectPage {
    fn write_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            write_block(&self.smgr, self.tag, &mut self.data)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl RedoPage for DirectPage {
    fn tag(&self) -> BufferTag {
        self.tag
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        self.dirty = true;
        self.write_if_dirty()
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        self.write_if_dirty()
    }
}

impl Drop for DirectPage {
    fn drop(&mut self) {
        if let Err(err) = self.write_if_dirty() {
            error!(page = %self.tag, error = %err, "buffer.direct.writeback_failed");
        }
    }
}

impl BlockSource for DirectReader {
    fn read(&self, tag: BufferTag, fill: PageFill, _lock: LockMode) -> Result<Box<dyn RedoPage>> {
        Ok(Box::new(self.read_page(tag, fill)?))
    }

    fn extend(
        &self,
        node: RelFileNode,
        fork: ForkNumber,
        _lock: LockMode,
    ) -> Result<Box<dyn RedoPage>> {
        let block = extend_block(&self.smgr, node, fork)?;
        Ok(Box::new(self.read_page(
            PageKey::new(node, fork, block),
            PageFill::Zero,
        )?))
    }

    fn drop_relation_buffers(
        &self,
        _node: RelFileNode,
        _fork: ForkNumber,
        _first_block: BlockNumber,
    ) -> Result<usize> {
        Ok(0)
    }

    fn flush_all(&self) -> Result<usize> {
        Ok(0)
    }
}
