#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::page;
use crate::storage::StorageRelation;
use crate::types::{BackendId, BlockNumber, ForkNumber, RedoError, RelFileNode, Result};

/// Slot through which a relation handle refers to its open storage.
///
/// The storage manager keeps a weak link to the slot of the handle that owns
/// an [`SmgrRelation`] and empties it when the relation is closed, so an
/// owner never keeps using a handle the manager has discarded.
pub type SmgrSlot = Arc<Mutex<Option<Arc<SmgrRelation>>>>;

/// Storage manager over per-fork relation files below a data directory.
pub struct StorageManager {
    root: PathBuf,
    page_size: usize,
    verify_checksums: bool,
    open: Mutex<FxHashMap<(RelFileNode, BackendId), Arc<SmgrRelation>>>,
}

/// Open storage of one relation: lazily opened fork files plus an owner link.
pub struct SmgrRelation {
    node: RelFileNode,
    backend: BackendId,
    root: PathBuf,
    page_size: usize,
    forks: Mutex<[Option<StdFileIo>; 4]>,
    owner: Mutex<Option<Weak<Mutex<Option<Arc<SmgrRelation>>>>>>,
    syncs: AtomicU64,
}

impl StorageManager {
    /// Creates a manager rooted at `root`.
    pub fn new(root: impl AsRef<Path>, page_size: usize, verify_checksums: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size,
            verify_checksums,
            open: Mutex::new(FxHashMap::default()),
        }
    }

    /// Data directory this manager resolves relation paths against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Page size of every fork file.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the open handle for `node`, opening it on first use.
    pub fn open(&self, node: RelFileNode, backend: BackendId) -> Arc<SmgrRelation> {
        let mut open = self.open.lock();
        Arc::clone(open.entry((node, backend)).or_insert_with(|| {
            trace!(rel = %node, backend, "smgr.open");
            Arc::new(SmgrRelation {
                node,
                backend,
                root: self.root.clone(),
                page_size: self.page_size,
                forks: Mutex::new([None, None, None, None]),
                owner: Mutex::new(None),
                syncs: AtomicU64::new(0),
            })
        }))
    }

    /// Opens storage for `rel` and registers `slot` as its owner.
    pub fn open_relation(&self, rel: &dyn StorageRelation, slot: &SmgrSlot) -> Arc<SmgrRelation> {
        let storage = self.open(rel.node(), rel.backend());
        storage.set_owner(slot);
        trace!(
            rel = %rel.node(),
            name = rel.display_name(),
            persistence = ?rel.persistence(),
            "smgr.open_relation"
        );
        storage
    }

    /// Verifies a page read from disk when checksum verification is on.
    pub fn verify_page(&self, block: BlockNumber, page: &[u8]) -> Result<()> {
        if self.verify_checksums && !page::verify_checksum(block, page) {
            return Err(RedoError::Corruption("page checksum mismatch"));
        }
        Ok(())
    }

    /// Closes every handle of `node` regardless of backend.
    pub fn close_node(&self, node: RelFileNode) {
        let closed: Vec<Arc<SmgrRelation>> = {
            let mut open = self.open.lock();
            let keys: Vec<_> = open.keys().filter(|(n, _)| *n == node).copied().collect();
            keys.into_iter().filter_map(|key| open.remove(&key)).collect()
        };
        for rel in closed {
            rel.detach_owner();
            debug!(rel = %node, backend = rel.backend, "smgr.close");
        }
    }

    /// Closes every open handle.
    pub fn close_all(&self) {
        let closed: Vec<Arc<SmgrRelation>> = self.open.lock().drain().map(|(_, rel)| rel).collect();
        let count = closed.len();
        for rel in closed {
            rel.detach_owner();
        }
        debug!(closed = count, "smgr.close_all");
    }

    /// Number of open relation handles.
    pub fn open_handles(&self) -> usize {
        self.open.lock().len()
    }
}

impl SmgrRelation {
    /// Relation identity.
    pub fn node(&self) -> RelFileNode {
        self.node
    }

    /// Owning backend.
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Absolute path of `fork`.
    pub fn path(&self, fork: ForkNumber) -> PathBuf {
        self.root.join(self.node.path(fork))
    }

    /// Registers `slot` as the owner of this handle and stores the handle in it.
    pub fn set_owner(self: &Arc<Self>, slot: &SmgrSlot) {
        *self.owner.lock() = Some(Arc::downgrade(slot));
        *slot.lock() = Some(Arc::clone(self));
    }

    /// Drops the owner link if it points at `slot`.
    pub fn clear_owner(&self, slot: &SmgrSlot) {
        let mut owner = self.owner.lock();
        let matches = owner
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(slot)));
        if matches {
            *owner = None;
        }
    }

    /// True while some handle owns this relation.
    pub fn has_owner(&self) -> bool {
        self.owner
            .lock()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    fn detach_owner(&self) {
        let owner = self.owner.lock().take();
        if let Some(slot) = owner.and_then(|weak| weak.upgrade()) {
            slot.lock().take();
        }
    }

    fn fork_io(&self, fork: ForkNumber, create: bool) -> Result<Option<StdFileIo>> {
        let mut forks = self.forks.lock();
        let slot = &mut forks[fork.as_u8() as usize];
        if let Some(io) = slot.as_ref() {
            return Ok(Some(io.clone()));
        }
        let path = self.path(fork);
        if !create && !path.exists() {
            return Ok(None);
        }
        let io = StdFileIo::open_or_create(&path)?;
        *slot = Some(io.clone());
        Ok(Some(io))
    }

    fn require_io(&self, fork: ForkNumber) -> Result<StdFileIo> {
        self.fork_io(fork, false)?
            .ok_or(RedoError::Invalid("relation fork does not exist"))
    }

    fn offset(&self, block: BlockNumber) -> u64 {
        block as u64 * self.page_size as u64
    }

    /// True if the fork file exists on disk.
    pub fn exists(&self, fork: ForkNumber) -> bool {
        self.forks.lock()[fork.as_u8() as usize].is_some() || self.path(fork).exists()
    }

    /// Creates the fork file if it is missing. Existing content is kept.
    pub fn create(&self, fork: ForkNumber) -> Result<()> {
        self.fork_io(fork, true).map(|_| ())
    }

    /// Number of whole pages in the fork; zero if the file does not exist.
    pub fn nblocks(&self, fork: ForkNumber) -> Result<BlockNumber> {
        match self.fork_io(fork, false)? {
            Some(io) => Ok((io.len()? / self.page_size as u64) as BlockNumber),
            None => Ok(0),
        }
    }

    /// Reads `block` of `fork` into `dst`.
    pub fn read_block(&self, fork: ForkNumber, block: BlockNumber, dst: &mut [u8]) -> Result<()> {
        let io = self.require_io(fork)?;
        io.read_at(self.offset(block), &mut dst[..self.page_size])
    }

    /// Writes `src` as `block` of `fork`.
    pub fn write_block(&self, fork: ForkNumber, block: BlockNumber, src: &[u8]) -> Result<()> {
        let io = self.require_io(fork)?;
        io.write_at(self.offset(block), &src[..self.page_size])
    }

    /// Appends `src` as `block`, creating the fork file if needed.
    ///
    /// Replay may extend past gaps; intermediate blocks read back as zeros.
    pub fn extend(&self, fork: ForkNumber, block: BlockNumber, src: &[u8]) -> Result<()> {
        let io = self
            .fork_io(fork, true)?
            .ok_or(RedoError::Invalid("relation fork does not exist"))?;
        io.write_at(self.offset(block), &src[..self.page_size])
    }

    /// Shrinks the fork to `nblocks` pages. Longer requests are no-ops.
    pub fn truncate(&self, fork: ForkNumber, nblocks: BlockNumber) -> Result<()> {
        let Some(io) = self.fork_io(fork, false)? else {
            return Ok(());
        };
        let target = self.offset(nblocks);
        if io.len()? > target {
            io.truncate(target)?;
            debug!(rel = %self.node, fork = %fork, nblocks, "smgr.truncate");
        }
        Ok(())
    }

    /// Forces the fork to stable storage.
    pub fn immedsync(&self, fork: ForkNumber) -> Result<()> {
        let Some(io) = self.fork_io(fork, false)? else {
            return Ok(());
        };
        io.sync_all()?;
        self.syncs.fetch_add(1, Ordering::Relaxed);
        trace!(rel = %self.node, fork = %fork, "smgr.immedsync");
        Ok(())
    }

    /// Number of completed [`SmgrRelation::immedsync`] calls on this handle.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }
}
