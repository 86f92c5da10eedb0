//! Low-level primitives for the redo engine.
//!
//! Includes positioned file I/O, the page header layout, and the relation
//! extension lock table.

/// Concurrency primitives and synchronization.
///
/// Per-relation extension locks serializing fork growth during replay.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing relation fork files.
pub mod io;

/// Page header layout and full-page image restoration.
pub mod page;
