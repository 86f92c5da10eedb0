//! Relation storage: fork files on disk and the relation handles that own them.

/// Relation stand-ins usable without a catalog.
pub mod fake_rel;
/// Storage manager over per-fork relation files.
pub mod smgr;

pub use fake_rel::{FakeRelation, FakeRelationFactory, StorageRelation};
pub use smgr::{SmgrRelation, SmgrSlot, StorageManager};
