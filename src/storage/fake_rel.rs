#![forbid(unsafe_code)]
//! Catalog-free relation stand-ins for code that needs a relation handle
//! during replay.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::smgr::{SmgrRelation, SmgrSlot, StorageManager};
use crate::types::{BackendId, Persistence, RelFileNode, INVALID_BACKEND_ID};

/// What the storage layer needs to know about a relation.
///
/// This is the only view storage code takes of a relation, so a stand-in
/// never has to pretend to be a catalog-backed handle.
pub trait StorageRelation {
    /// Physical identity.
    fn node(&self) -> RelFileNode;
    /// Owning backend.
    fn backend(&self) -> BackendId;
    /// Persistence class.
    fn persistence(&self) -> Persistence;
    /// Name used in diagnostics.
    fn display_name(&self) -> &str;
}

/// Minimal relation value built without catalog access.
pub struct FakeRelation {
    node: RelFileNode,
    backend: BackendId,
    persistence: Persistence,
    name: String,
    smgr: SmgrSlot,
}

/// Builds [`FakeRelation`] values.
#[derive(Default, Debug, Clone, Copy)]
pub struct FakeRelationFactory;

impl FakeRelationFactory {
    /// Creates a stand-in for `node`.
    ///
    /// Without `display_name` the relation is named
    /// `"<tablespace>/<database>/<relfile>"`.
    pub fn make(
        node: RelFileNode,
        backend: BackendId,
        persistence: Persistence,
        display_name: Option<&str>,
    ) -> FakeRelation {
        let name = match display_name {
            Some(name) => name.to_owned(),
            None => node.to_string(),
        };
        FakeRelation {
            node,
            backend,
            persistence,
            name,
            smgr: Arc::new(Mutex::new(None)),
        }
    }

    /// Stand-in for a relation touched by WAL replay: shared backend,
    /// permanent persistence.
    pub fn for_recovery(node: RelFileNode) -> FakeRelation {
        Self::make(node, INVALID_BACKEND_ID, Persistence::Permanent, None)
    }
}

impl FakeRelation {
    /// Opens (or reuses) storage for this relation and registers as its owner.
    pub fn open_smgr(&self, smgr: &StorageManager) -> Arc<SmgrRelation> {
        if let Some(rel) = self.smgr.lock().as_ref() {
            return Arc::clone(rel);
        }
        smgr.open_relation(self, &self.smgr)
    }

    /// Storage currently attached, if the manager has not closed it.
    pub fn smgr(&self) -> Option<Arc<SmgrRelation>> {
        self.smgr.lock().clone()
    }

    /// Releases the relation, detaching it from its storage first.
    pub fn dispose(self) {
        drop(self);
    }
}

impl StorageRelation for FakeRelation {
    fn node(&self) -> RelFileNode {
        self.node
    }

    fn backend(&self) -> BackendId {
        self.backend
    }

    fn persistence(&self) -> Persistence {
        self.persistence
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl Drop for FakeRelation {
    fn drop(&mut self) {
        let attached = self.smgr.lock().take();
        if let Some(rel) = attached {
            rel.clear_owner(&self.smgr);
        }
    }
}

impl std::fmt::Debug for FakeRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRelation")
            .field("node", &self.node)
            .field("backend", &self.backend)
            .field("persistence", &self.persistence)
            .field("name", &self.name)
            .finish()
    }
}
