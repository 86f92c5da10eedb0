#![forbid(unsafe_code)]

use tracing::{debug, trace};

use crate::buffer::{BlockSource, LocalBufferCache, LockMode, PageFill, ReadMethod, RedoPage};
use crate::primitives::page;
use crate::redo::{InvalidPageTracker, ReadBufferMode, RedoEnv, ResolvedPage};
use crate::types::{BlockRef, Result, INVALID_BACKEND_ID};

/// Locates the page a block reference names, extending the fork when a zero
/// mode asks for a block past its end.
///
/// Misses in [`ReadBufferMode::Normal`] are recorded in the session's
/// [`InvalidPageTracker`].
pub struct RedoBufferResolver<'a> {
    env: &'a RedoEnv,
    local: &'a LocalBufferCache,
    tracker: &'a mut InvalidPageTracker,
}

impl<'a> RedoBufferResolver<'a> {
    pub(crate) fn new(
        env: &'a RedoEnv,
        local: &'a LocalBufferCache,
        tracker: &'a mut InvalidPageTracker,
    ) -> Self {
        Self { env, local, tracker }
    }

    pub(crate) fn env(&self) -> &'a RedoEnv {
        self.env
    }

    /// Returns the page for `block` pinned and locked, or `None` when it
    /// does not exist or was never initialized.
    ///
    /// The fork is created if missing. Zero modes hand back a zero-filled
    /// page. A cleanup lock is taken when `cleanup_lock` is set or the mode
    /// is [`ReadBufferMode::ZeroAndCleanupLock`].
    pub fn resolve(
        &mut self,
        block: BlockRef,
        mode: ReadBufferMode,
        cleanup_lock: bool,
        method: ReadMethod,
    ) -> Result<Option<ResolvedPage>> {
        let env = self.env;
        let source = env.source(self.local, method);
        let lock = if cleanup_lock || mode == ReadBufferMode::ZeroAndCleanupLock {
            LockMode::Cleanup
        } else {
            LockMode::Exclusive
        };
        let fill = match mode {
            ReadBufferMode::ZeroAndLock | ReadBufferMode::ZeroAndCleanupLock => PageFill::Zero,
            ReadBufferMode::ZeroOnError => PageFill::ZeroOnError,
            ReadBufferMode::Normal | ReadBufferMode::NormalNoLog => PageFill::Read,
        };

        let rel = env.smgr().open(block.node, INVALID_BACKEND_ID);
        rel.create(block.fork)?;
        let nblocks = rel.nblocks(block.fork)?;

        let page = if block.block < nblocks {
            source.read(block, fill, lock)?
        } else {
            match mode {
                ReadBufferMode::Normal => {
                    self.tracker.log(block, false);
                    return Ok(None);
                }
                ReadBufferMode::NormalNoLog => return Ok(None),
                _ => self.extend_to(source, block, fill, lock)?,
            }
        };

        if mode == ReadBufferMode::Normal && page::is_new(page.data()) {
            page.release()?;
            self.tracker.log(block, true);
            return Ok(None);
        }
        trace!(page = %block, ?mode, ?method, "redo.resolve");
        Ok(Some(ResolvedPage::new(page, block)))
    }

    fn extend_to(
        &self,
        source: &dyn BlockSource,
        block: BlockRef,
        fill: PageFill,
        lock: LockMode,
    ) -> Result<Box<dyn RedoPage>> {
        let page = {
            let _extension = self.env.extension_locks().lock(block.node);
            loop {
                let page = source.extend(block.node, block.fork, lock)?;
                if page.tag().block >= block.block {
                    break page;
                }
                page.release()?;
            }
        };
        if page.tag().block == block.block {
            return Ok(page);
        }
        // Another worker extended past the target while we waited.
        debug!(
            page = %block,
            extended_to = page.tag().block,
            "redo.resolve.extend_overshoot"
        );
        page.release()?;
        source.read(block, fill, lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RedoOptions;
    use crate::types::{ForkNumber, PageKey, RelFileNode, DEFAULT_TABLESPACE_OID};
    use tempfile::tempdir;

    fn key(block: u32) -> PageKey {
        PageKey::new(RelFileNode::new(DEFAULT_TABLESPACE_OID, 1, 500), ForkNumber::Main, block)
    }

    #[test]
    fn normal_miss_is_tracked() -> Result<()> {
        let dir = tempdir().unwrap();
        let env = RedoEnv::open(RedoOptions::with_data_dir(dir.path()))?;
        let mut session = env.session(0);
        let found = session.resolve(key(3), ReadBufferMode::Normal, false, ReadMethod::Shared)?;
        assert!(found.is_none());
        let none = session.resolve(key(4), ReadBufferMode::NormalNoLog, false, ReadMethod::Shared)?;
        assert!(none.is_none());
        let entries = session.tracker().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key(3));
        assert!(!entries[0].present);
        Ok(())
    }

    #[test]
    fn zero_mode_extends_through_target() -> Result<()> {
        let dir = tempdir().unwrap();
        let env = RedoEnv::open(RedoOptions::with_data_dir(dir.path()))?;
        let mut session = env.session(0);
        for method in [ReadMethod::Shared, ReadMethod::Local, ReadMethod::Direct] {
            let target = key(2);
            let target = PageKey::new(
                RelFileNode::new(DEFAULT_TABLESPACE_OID, 1, 600 + method as u32),
                target.fork,
                target.block,
            );
            let page = session
                .resolve(target, ReadBufferMode::ZeroAndLock, false, method)?
                .expect("zero mode always returns a page");
            assert_eq!(page.block(), target);
            assert!(page.data().iter().all(|&b| b == 0));
            page.release()?;
            let rel = env.smgr().open(target.node, INVALID_BACKEND_ID);
            assert_eq!(rel.nblocks(ForkNumber::Main)?, 3);
        }
        assert!(session.tracker().is_empty());
        Ok(())
    }

    #[test]
    fn uninitialized_page_is_tracked_as_present() -> Result<()> {
        let dir = tempdir().unwrap();
        let env = RedoEnv::open(RedoOptions::with_data_dir(dir.path()))?;
        let mut session = env.session(0);
        session
            .resolve(key(0), ReadBufferMode::ZeroAndLock, false, ReadMethod::Shared)?
            .expect("extended")
            .release()?;
        assert!(session
            .resolve(key(0), ReadBufferMode::Normal, false, ReadMethod::Shared)?
            .is_none());
        let entries = session.tracker().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].present);
        Ok(())
    }
}
