#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{BlockSource, BufferPool, DirectReader, LocalBufferCache, ReadMethod};
use crate::options::RedoOptions;
use crate::primitives::concurrency::ExtensionLocks;
use crate::redo::{
    InvalidPageTracker, ReadBufferMode, RedoAction, RedoApplier, RedoBufferResolver,
    ResolvedPage, WorkerHandOff,
};
use crate::storage::StorageManager;
use crate::types::{BlockRef, ForkNumber, Lsn, Oid, PageKey, RelFileNode, Result, TimeLineId};
use crate::wal::{RecordView, SegmentFileReader};

/// State shared by every redo worker: storage, the shared buffer pool and
/// relation extension locks.
pub struct RedoEnv {
    options: RedoOptions,
    smgr: Arc<StorageManager>,
    pool: BufferPool,
    direct: DirectReader,
    extension_locks: ExtensionLocks,
}

impl RedoEnv {
    /// Validates `options`, creates the data directory and builds the
    /// shared state.
    pub fn open(options: RedoOptions) -> Result<Arc<Self>> {
        options.validate()?;
        fs::create_dir_all(&options.data_dir)?;
        let smgr = Arc::new(StorageManager::new(
            &options.data_dir,
            options.page_size,
            options.verify_checksums,
        ));
        let pool = BufferPool::new(Arc::clone(&smgr), options.shared_buffers);
        let direct = DirectReader::new(Arc::clone(&smgr));
        info!(
            data_dir = %options.data_dir.display(),
            page_size = options.page_size,
            shared_buffers = options.shared_buffers,
            strict_lsn_check = options.strict_lsn_check,
            "redo.env.open"
        );
        Ok(Arc::new(Self {
            options,
            smgr,
            pool,
            direct,
            extension_locks: ExtensionLocks::new(),
        }))
    }

    /// Options the environment was opened with.
    pub fn options(&self) -> &RedoOptions {
        &self.options
    }

    /// Storage manager.
    pub fn smgr(&self) -> &Arc<StorageManager> {
        &self.smgr
    }

    /// Shared buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Relation extension locks.
    pub fn extension_locks(&self) -> &ExtensionLocks {
        &self.extension_locks
    }

    /// Directory WAL segments are read from. A relative `wal_dir` is taken
    /// relative to the data directory.
    pub fn wal_dir(&self) -> PathBuf {
        self.options.data_dir.join(&self.options.wal_dir)
    }

    /// Starts a session for worker `worker_id`.
    pub fn session(self: &Arc<Self>, worker_id: usize) -> RedoSession {
        RedoSession::new(Arc::clone(self), worker_id)
    }

    pub(crate) fn source<'s>(
        &'s self,
        local: &'s LocalBufferCache,
        method: ReadMethod,
    ) -> &'s dyn BlockSource {
        match method {
            ReadMethod::Shared => &self.pool,
            ReadMethod::Local => local,
            ReadMethod::Direct => &self.direct,
        }
    }
}

/// One worker's replay context.
///
/// Owns the worker's invalid-page table, local buffer cache and open WAL
/// segment. Nothing in a session is shared with other workers.
pub struct RedoSession {
    pub(super) env: Arc<RedoEnv>,
    worker_id: usize,
    pub(super) tracker: InvalidPageTracker,
    pub(super) local: LocalBufferCache,
    segments: SegmentFileReader,
}

impl RedoSession {
    fn new(env: Arc<RedoEnv>, worker_id: usize) -> Self {
        let local = LocalBufferCache::new(Arc::clone(env.smgr()), env.options.local_buffers);
        let segments = SegmentFileReader::new(env.wal_dir(), env.options.wal_segment_size);
        debug!(worker = worker_id, "redo.session.start");
        Self {
            env,
            worker_id,
            tracker: InvalidPageTracker::new(),
            local,
            segments,
        }
    }

    /// Worker this session belongs to.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Shared environment.
    pub fn env(&self) -> &Arc<RedoEnv> {
        &self.env
    }

    /// Invalid pages recorded so far.
    pub fn tracker(&self) -> &InvalidPageTracker {
        &self.tracker
    }

    /// The worker's local buffer cache.
    pub fn local_buffers(&self) -> &LocalBufferCache {
        &self.local
    }

    /// Resolver bound to this session.
    pub fn resolver(&mut self) -> RedoBufferResolver<'_> {
        RedoBufferResolver::new(&self.env, &self.local, &mut self.tracker)
    }

    /// Applier bound to this session.
    pub fn applier(&mut self) -> RedoApplier<'_> {
        let strict = self.env.options.strict_lsn_check;
        RedoApplier::new(self.resolver(), strict)
    }

    /// See [`RedoBufferResolver::resolve`].
    pub fn resolve(
        &mut self,
        block: BlockRef,
        mode: ReadBufferMode,
        cleanup_lock: bool,
        method: ReadMethod,
    ) -> Result<Option<ResolvedPage>> {
        self.resolver().resolve(block, mode, cleanup_lock, method)
    }

    /// See [`RedoApplier::apply_or_skip`].
    pub fn apply_or_skip(
        &mut self,
        record: &dyn RecordView,
        block_id: u8,
        mode: ReadBufferMode,
        cleanup_lock: bool,
        method: ReadMethod,
    ) -> Result<(RedoAction, Option<ResolvedPage>)> {
        self.applier()
            .apply_or_skip(record, block_id, mode, cleanup_lock, method)
    }

    /// Records an invalid page reference observed by a redo routine.
    pub fn log_invalid_page(&mut self, key: PageKey, present: bool) {
        self.tracker.log(key, present);
    }

    /// Reads WAL bytes through the session's segment reader.
    pub fn read_wal(&mut self, buf: &mut [u8], timeline: TimeLineId, start: Lsn) -> Result<()> {
        self.segments.read(buf, timeline, start)
    }

    /// Closes the session's open WAL segment.
    pub fn close_wal(&mut self) {
        self.segments.close();
    }

    /// Forgets every invalid page of `node`, discards its buffered pages and
    /// closes its storage handle. Used when replay drops a relation.
    pub fn forget_relation(&mut self, node: RelFileNode) -> Result<usize> {
        let forgotten = self.tracker.forget_relation(node);
        for fork in ForkNumber::ALL {
            self.env.pool.drop_relation_buffers(node, fork, 0)?;
            self.local.drop_relation_buffers(node, fork, 0)?;
        }
        self.env.smgr.close_node(node);
        debug!(worker = self.worker_id, rel = %node, forgotten, "redo.drop_relation");
        Ok(forgotten)
    }

    /// Closes every storage handle, then forgets invalid pages of `db`.
    pub fn drop_database(&mut self, db: Oid) -> usize {
        self.env.smgr.close_all();
        let forgotten = self.tracker.forget_database(db);
        debug!(worker = self.worker_id, db, forgotten, "redo.drop_database");
        forgotten
    }

    /// Writes back every dirty unpinned page in the local cache and the
    /// shared pool.
    pub fn sync_all_buffers(&self) -> Result<usize> {
        let written = self.local.flush_all()? + self.env.pool.flush_all()?;
        debug!(worker = self.worker_id, written, "redo.sync_all_buffers");
        Ok(written)
    }

    /// Surrenders the invalid-page table for the end-of-recovery merge.
    pub fn hand_over(&mut self) -> WorkerHandOff {
        WorkerHandOff {
            worker_id: self.worker_id,
            table: self.tracker.hand_over(),
        }
    }

    /// Single-worker end-of-recovery check, honoring `ignore_invalid_pages`.
    pub fn check_and_consume(&mut self) -> Result<usize> {
        let ignore = self.env.options.ignore_invalid_pages;
        self.tracker.check_and_consume(ignore)
    }
}
