#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::types::RelFileNode;

/// Per-relation extension locks.
///
/// Redo paths that grow a fork hold the relation's lock while they extend,
/// so two workers never allocate the same block number.
#[derive(Clone, Default)]
pub struct ExtensionLocks {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<LockState>,
    released: Condvar,
}

#[derive(Default)]
struct LockState {
    held: FxHashSet<RelFileNode>,
    acquisitions: u64,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct ExtensionLockSnapshot {
    /// Number of relations whose extension lock is held.
    pub held: usize,
    /// Total acquisitions since creation.
    pub acquisitions: u64,
}

/// Guard for a held relation extension lock. Dropping it releases the lock.
pub struct ExtensionGuard {
    inner: Arc<Inner>,
    node: RelFileNode,
}

impl ExtensionLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the extension lock of `node` is free, then takes it.
    pub fn lock(&self, node: RelFileNode) -> ExtensionGuard {
        let mut state = self.inner.state.lock();
        while state.held.contains(&node) {
            self.inner.released.wait(&mut state);
        }
        state.held.insert(node);
        state.acquisitions += 1;
        trace!(rel = %node, "extension_lock.acquire");
        ExtensionGuard {
            inner: Arc::clone(&self.inner),
            node,
        }
    }

    /// Returns true if `node`'s extension lock is currently held.
    pub fn is_locked(&self, node: RelFileNode) -> bool {
        self.inner.state.lock().held.contains(&node)
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> ExtensionLockSnapshot {
        let state = self.inner.state.lock();
        ExtensionLockSnapshot {
            held: state.held.len(),
            acquisitions: state.acquisitions,
        }
    }
}

impl Drop for ExtensionGuard {
    fn drop(&mut self) {
        self.inner.state.lock().held.remove(&self.node);
        trace!(rel = %self.node, "extension_lock.release");
        self.inner.released.notify_all();
    }
}
