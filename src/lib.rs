//! Page-level WAL redo support for crash recovery and standby replay.
//!
//! A redo routine asks a [`RedoSession`] for the page each block reference
//! of a decoded record names. The session's [`RedoApplier`] decides whether
//! the change is already on the page, restores full-page images, and hands
//! back the locked page when the routine still has work to do. Pages that
//! cannot be found are remembered by the [`InvalidPageTracker`] until a
//! later truncate or drop explains them, or until the end-of-recovery check.
//!
//! ```no_run
//! use pageredo::{ReadBufferMode, ReadMethod, RedoAction, RedoEnv, RedoOptions};
//! use pageredo::wal::{DecodedBlock, DecodedRecord};
//! use pageredo::{ForkNumber, Lsn, RelFileNode};
//!
//! # fn main() -> pageredo::Result<()> {
//! let env = RedoEnv::open(RedoOptions::with_data_dir("/var/lib/db"))?;
//! let mut session = env.session(0);
//! let node = RelFileNode::new(1663, 5, 16384);
//! let record = DecodedRecord::new(Lsn(0x0100_0200))
//!     .with_block(0, DecodedBlock::new(node, ForkNumber::Main, 3));
//! let (action, page) =
//!     session.apply_or_skip(&record, 0, ReadBufferMode::Normal, false, ReadMethod::Shared)?;
//! if let (RedoAction::NeedsRedo, Some(mut page)) = (action, page) {
//!     // apply the change, then stamp the record LSN
//!     page.set_page_lsn(page.replay_lsn());
//!     page.mark_dirty();
//!     page.release()?;
//! }
//! session.check_and_consume()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod options;
pub mod primitives;
pub mod redo;
pub mod storage;
pub mod types;
pub mod wal;

pub use buffer::{BlockSource, BufferPool, LocalBufferCache, LockMode, ReadMethod, RedoPage};
pub use options::{ConfigError, RedoOptions};
pub use redo::{
    InvalidPageEntry, InvalidPageMerge, InvalidPageTracker, ReadBufferMode, RedoAction,
    RedoApplier, RedoBufferResolver, RedoEnv, RedoSession, ResolvedPage, WorkerHandOff,
};
pub use storage::{FakeRelation, FakeRelationFactory, StorageManager};
pub use types::{
    BlockNumber, BlockRef, ForkNumber, Lsn, Oid, PageKey, Persistence, RedoError, RelFileNode,
    Result, TimeLineId,
};
