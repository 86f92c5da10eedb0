use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

use super::{load_block, write_block, BufferTag, PageFill};
use crate::storage::StorageManager;
use crate::types::{BlockNumber, ForkNumber, RedoError, RelFileNode, Result};

/// Counters kept by a frame table.
#[derive(Clone, Debug, Default)]
pub struct BufferStats {
    /// Lookups satisfied from memory.
    pub hits: u64,
    /// Lookups that loaded a page.
    pub misses: u64,
    /// Frames reused for another page.
    pub evictions: u64,
    /// Dirty pages written back.
    pub writebacks: u64,
}

pub(crate) struct Frame {
    pub tag: Option<BufferTag>,
    pub buf: Arc<RwLock<Box<[u8]>>>,
    pub reference: bool,
    pub dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Self {
            tag: None,
            buf: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            reference: false,
            dirty: false,
            pin_count: 0,
        }
    }

    fn reset(&mut self) {
        self.tag = None;
        self.reference = false;
        self.dirty = false;
        self.pin_count = 0;
    }
}

/// Fixed set of page frames with a tag lookup table and clock replacement.
///
/// Callers serialize access; content locks live on each frame's buffer.
pub(crate) struct FrameTable {
    frames: Vec<Frame>,
    page_table: FxHashMap<BufferTag, usize>,
    clock_hand: usize,
    pub stats: BufferStats,
}

impl FrameTable {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            frames: (0..capacity.max(1)).map(|_| Frame::new(page_size)).collect(),
            page_table: FxHashMap::default(),
            clock_hand: 0,
            stats: BufferStats::default(),
        }
    }

    pub fn frame(&self, idx: usize) -> &Frame {
        &self.frames[idx]
    }

    pub fn frame_mut(&mut self, idx: usize) -> &mut Frame {
        &mut self.frames[idx]
    }

    /// Pins `tag` if it is resident.
    pub fn pin_resident(&mut self, tag: &BufferTag) -> Option<usize> {
        let idx = *self.page_table.get(tag)?;
        let frame = &mut self.frames[idx];
        frame.pin_count += 1;
        frame.reference = true;
        self.stats.hits += 1;
        Some(idx)
    }

    /// Loads `tag` into a free or evicted frame and pins it.
    pub fn pin_loaded(
        &mut self,
        smgr: &StorageManager,
        tag: BufferTag,
        fill: PageFill,
    ) -> Result<usize> {
        let idx = self.obtain_frame(smgr)?;
        let loaded = {
            let mut guard = self.frames[idx].buf.write();
            load_block(smgr, tag, fill, &mut guard)
        };
        loaded?;
        let frame = &mut self.frames[idx];
        frame.tag = Some(tag);
        frame.reference = true;
        frame.pin_count = 1;
        self.page_table.insert(tag, idx);
        self.stats.misses += 1;
        Ok(idx)
    }

    /// Drops one pin and returns how many remain.
    pub fn unpin(&mut self, idx: usize) -> u32 {
        let frame = &mut self.frames[idx];
        frame.pin_count = frame.pin_count.saturating_sub(1);
        frame.pin_count
    }

    fn obtain_frame(&mut self, smgr: &StorageManager) -> Result<usize> {
        if let Some(idx) = self
            .frames
            .iter()
            .position(|frame| frame.tag.is_none() && frame.pin_count == 0)
        {
            return Ok(idx);
        }
        let len = self.frames.len();
        for _ in 0..len * 2 {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % len;
            let frame = &mut self.frames[idx];
            if frame.pin_count > 0 {
                continue;
            }
            if frame.reference {
                frame.reference = false;
                continue;
            }
            self.evict(smgr, idx)?;
            return Ok(idx);
        }
        Err(RedoError::Invalid("no unpinned buffer available"))
    }

    fn evict(&mut self, smgr: &StorageManager, idx: usize) -> Result<()> {
        self.write_back(smgr, idx)?;
        if let Some(old) = self.frames[idx].tag {
            self.page_table.remove(&old);
            trace!(page = %old, "buffer.evict");
        }
        self.frames[idx].reset();
        self.stats.evictions += 1;
        Ok(())
    }

    fn write_back(&mut self, smgr: &StorageManager, idx: usize) -> Result<()> {
        let frame = &mut self.frames[idx];
        let Some(tag) = frame.tag else {
            return Ok(());
        };
        if !frame.dirty {
            return Ok(());
        }
        {
            let mut guard = frame.buf.write();
            write_block(smgr, tag, &mut guard)?;
        }
        frame.dirty = false;
        self.stats.writebacks += 1;
        Ok(())
    }

    /// Forgets resident pages of `fork` at or past `first_block`.
    pub fn drop_range(
        &mut self,
        node: RelFileNode,
        fork: ForkNumber,
        first_block: BlockNumber,
    ) -> Result<usize> {
        let victims: Vec<(BufferTag, usize)> = self
            .page_table
            .iter()
            .filter(|(tag, _)| tag.node == node && tag.fork == fork && tag.block >= first_block)
            .map(|(tag, &idx)| (*tag, idx))
            .collect();
        if victims
            .iter()
            .any(|&(_, idx)| self.frames[idx].pin_count > 0)
        {
            return Err(RedoError::Invalid("cannot drop a pinned buffer"));
        }
        for (tag, idx) in &victims {
            self.page_table.remove(tag);
            self.frames[*idx].reset();
        }
        Ok(victims.len())
    }

    /// Writes back every dirty frame nobody has pinned.
    pub fn flush_unpinned(&mut self, smgr: &StorageManager) -> Result<usize> {
        let mut written = 0;
        for idx in 0..self.frames.len() {
            let frame = &self.frames[idx];
            if frame.dirty && frame.pin_count == 0 {
                self.write_back(smgr, idx)?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn pins(&self, tag: &BufferTag) -> u32 {
        self.page_table
            .get(tag)
            .map_or(0, |&idx| self.frames[idx].pin_count)
    }

    pub fn resident(&self) -> usize {
        self.page_table.len()
    }

    pub fn dirty(&self) -> usize {
        self.frames.iter().filter(|frame| frame.dirty).count()
    }
}
