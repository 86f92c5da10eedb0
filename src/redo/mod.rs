//! Page-level redo: locating pages for replay, deciding whether a logged
//! change still applies, restoring full-page images, and tracking pages that
//! cannot be found.

use std::fmt;

use crate::buffer::RedoPage;
use crate::primitives::page;
use crate::types::{BlockRef, Lsn, Result};

mod applier;
mod invalid;
mod resolver;
mod session;
mod truncate;

pub use applier::RedoApplier;
pub use invalid::{InvalidPageEntry, InvalidPageMerge, InvalidPageTable, InvalidPageTracker, WorkerHandOff};
pub use resolver::RedoBufferResolver;
pub use session::{RedoEnv, RedoSession};
pub use truncate::{fsm_blocks_for_heap, vm_blocks_for_heap, HeapTruncation};

/// How a block is fetched for replay.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReadBufferMode {
    /// Read an existing page; a missing or never-initialized page is tracked
    /// as invalid.
    Normal,
    /// Like `Normal` but misses are not tracked.
    NormalNoLog,
    /// Zero-fill the page, extending the fork if needed, under an exclusive lock.
    ZeroAndLock,
    /// Like `ZeroAndLock` but under a cleanup lock.
    ZeroAndCleanupLock,
    /// Read the page, zero-filling it if it fails verification; extends the
    /// fork like the zero modes.
    ZeroOnError,
}

impl ReadBufferMode {
    /// True for the modes a record marked `will_init` must use.
    pub fn is_zero(self) -> bool {
        matches!(self, ReadBufferMode::ZeroAndLock | ReadBufferMode::ZeroAndCleanupLock)
    }
}

/// Outcome of one block's redo decision.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RedoAction {
    /// The change is not on the page yet; the caller applies it.
    NeedsRedo,
    /// The page already carries the change.
    Done,
    /// The page was overwritten from a full-page image.
    Restored,
    /// The page does not exist or was never initialized.
    NotFound,
}

impl fmt::Display for RedoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RedoAction::NeedsRedo => "needs_redo",
            RedoAction::Done => "done",
            RedoAction::Restored => "restored",
            RedoAction::NotFound => "not_found",
        };
        f.write_str(name)
    }
}

/// A page located for replay, pinned and locked until released or dropped.
pub struct ResolvedPage {
    page: Box<dyn RedoPage>,
    block: BlockRef,
    replay_lsn: Lsn,
}

impl ResolvedPage {
    pub(crate) fn new(page: Box<dyn RedoPage>, block: BlockRef) -> Self {
        Self {
            page,
            block,
            replay_lsn: Lsn::INVALID,
        }
    }

    pub(crate) fn with_replay_lsn(mut self, lsn: Lsn) -> Self {
        self.replay_lsn = lsn;
        self
    }

    /// Which block this is.
    pub fn block(&self) -> BlockRef {
        self.block
    }

    /// End LSN of the record being replayed, if resolved through the applier.
    pub fn replay_lsn(&self) -> Lsn {
        self.replay_lsn
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page.data().len()
    }

    /// Page bytes.
    pub fn data(&self) -> &[u8] {
        self.page.data()
    }

    /// Mutable page bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.page.data_mut()
    }

    /// LSN stored on the page.
    pub fn page_lsn(&self) -> Lsn {
        page::lsn(self.page.data())
    }

    /// Stamps the page LSN. Content and LSN change together under the lock.
    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        page::set_lsn(self.page.data_mut(), lsn);
    }

    /// Records that the page must be written back.
    pub fn mark_dirty(&mut self) {
        self.page.mark_dirty();
    }

    /// Writes the page to disk now.
    pub fn flush(&mut self) -> Result<()> {
        self.page.flush()
    }

    /// Unlocks and unpins the page.
    pub fn release(self) -> Result<()> {
        self.page.release()
    }
}

impl fmt::Debug for ResolvedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedPage")
            .field("block", &self.block)
            .field("replay_lsn", &self.replay_lsn)
            .field("page_lsn", &self.page_lsn())
            .finish()
    }
}
