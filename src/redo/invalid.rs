#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::types::{BlockNumber, ForkNumber, Oid, PageKey, RedoError, RelFileNode, Result};

/// A page referenced by WAL that could not be resolved when it was seen.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct InvalidPageEntry {
    /// Page identity.
    pub key: PageKey,
    /// The block existed but was never initialized. `false` means it lay
    /// past the end of its fork.
    pub present: bool,
}

impl InvalidPageEntry {
    fn state(&self) -> &'static str {
        if self.present {
            "is uninitialized"
        } else {
            "does not exist"
        }
    }
}

/// Per-session table of invalid page references.
///
/// Only its owning session touches it. Parallel replay hands each worker's
/// table to an [`InvalidPageMerge`] at the end of recovery.
#[derive(Debug, Default)]
pub struct InvalidPageTracker {
    table: Option<FxHashMap<PageKey, bool>>,
    reported: u64,
}

/// Contents of a tracker surrendered by its owner.
#[derive(Debug, Default, Clone)]
pub struct InvalidPageTable {
    entries: Vec<InvalidPageEntry>,
    reported: u64,
}

impl InvalidPageTable {
    /// Surrendered entries, ordered by key.
    pub fn entries(&self) -> &[InvalidPageEntry] {
        &self.entries
    }

    /// Invalid page references the owner saw, including forgotten ones.
    pub fn reported(&self) -> u64 {
        self.reported
    }
}

impl InvalidPageTracker {
    /// Creates an empty tracker. The hash table is allocated on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reference to `key` that could not be resolved.
    ///
    /// The first classification of a key wins; later reports leave it as is.
    pub fn log(&mut self, key: PageKey, present: bool) {
        self.reported += 1;
        debug!(
            rel = %key.node.path(key.fork),
            block = key.block,
            present,
            "redo.invalid_page.log"
        );
        self.table
            .get_or_insert_with(FxHashMap::default)
            .entry(key)
            .or_insert(present);
    }

    fn forget_where(&mut self, mut doomed: impl FnMut(&PageKey) -> bool) -> usize {
        let Some(table) = self.table.as_mut() else {
            return 0;
        };
        let before = table.len();
        table.retain(|key, _| {
            if doomed(key) {
                debug!(
                    rel = %key.node.path(key.fork),
                    block = key.block,
                    "redo.invalid_page.dropped"
                );
                false
            } else {
                true
            }
        });
        before - table.len()
    }

    /// Forgets entries of `fork` at or past `min_block`, as after a truncate.
    pub fn forget_range(&mut self, node: RelFileNode, fork: ForkNumber, min_block: BlockNumber) -> usize {
        self.forget_where(|key| key.node == node && key.fork == fork && key.block >= min_block)
    }

    /// Forgets every entry of every fork of `node`.
    pub fn forget_relation(&mut self, node: RelFileNode) -> usize {
        ForkNumber::ALL
            .iter()
            .map(|&fork| self.forget_range(node, fork, 0))
            .sum()
    }

    /// Forgets every entry whose relation lives in database `db`.
    pub fn forget_database(&mut self, db: Oid) -> usize {
        self.forget_where(|key| key.node.db_node == db)
    }

    /// True if any entry remains. Remaining entries are listed at debug level.
    pub fn has_unresolved(&self) -> bool {
        let unresolved = !self.is_empty();
        if unresolved {
            self.report_all();
        }
        unresolved
    }

    /// Number of remaining entries.
    pub fn len(&self) -> usize {
        self.table.as_ref().map_or(0, |table| table.len())
    }

    /// True if no entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalid page references seen so far, including forgotten ones.
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Remaining entries ordered by key.
    pub fn entries(&self) -> Vec<InvalidPageEntry> {
        let mut entries: Vec<InvalidPageEntry> = self
            .table
            .iter()
            .flatten()
            .map(|(&key, &present)| InvalidPageEntry { key, present })
            .collect();
        entries.sort_by_key(|entry| entry.key);
        entries
    }

    /// Lists every remaining entry at debug level.
    pub fn report_all(&self) {
        for entry in self.entries() {
            debug!(
                rel = %entry.key.node.path(entry.key.fork),
                block = entry.key.block,
                present = entry.present,
                "redo.invalid_page.pending"
            );
        }
    }

    /// Surrenders the table, leaving this tracker empty.
    pub fn hand_over(&mut self) -> InvalidPageTable {
        let entries = self.entries();
        self.table = None;
        InvalidPageTable {
            entries,
            reported: std::mem::take(&mut self.reported),
        }
    }

    /// End-of-recovery check for a single-threaded session.
    ///
    /// Warns once per remaining entry, then fails unless `ignore` is set.
    /// The table is emptied either way.
    pub fn check_and_consume(&mut self, ignore: bool) -> Result<usize> {
        let table = self.hand_over();
        decide(&table.entries, table.reported, ignore)
    }
}

fn decide(entries: &[InvalidPageEntry], reported: u64, ignore: bool) -> Result<usize> {
    for entry in entries {
        warn!(
            rel = %entry.key.node.path(entry.key.fork),
            fork = %entry.key.fork,
            block = entry.key.block,
            "{} {}",
            entry.key,
            entry.state()
        );
    }
    let count = entries.len();
    if count == 0 {
        debug!(reported, "redo.invalid_pages.none");
        return Ok(0);
    }
    if ignore {
        warn!(count, reported, "redo.invalid_pages.ignored");
        return Ok(count);
    }
    error!(count, reported, "redo.invalid_pages.fatal");
    Err(RedoError::InvalidPages(count))
}

/// A worker's surrendered table, tagged with the worker it came from.
#[derive(Debug)]
pub struct WorkerHandOff {
    /// Worker that owned the table.
    pub worker_id: usize,
    /// Surrendered contents.
    pub table: InvalidPageTable,
}

/// End-of-recovery merge of every parallel worker's invalid pages.
#[derive(Debug)]
pub struct InvalidPageMerge {
    expected_workers: usize,
    received: Vec<WorkerHandOff>,
}

impl InvalidPageMerge {
    /// Expects one hand-off from each of `expected_workers` workers.
    pub fn new(expected_workers: usize) -> Self {
        Self {
            expected_workers,
            received: Vec::with_capacity(expected_workers),
        }
    }

    /// Accepts a worker's hand-off. Workers are numbered
    /// `0..expected_workers` and each hands over once.
    pub fn collect(&mut self, hand_off: WorkerHandOff) -> Result<()> {
        if hand_off.worker_id >= self.expected_workers {
            return Err(RedoError::Invalid("hand-off from an unknown redo worker"));
        }
        if self
            .received
            .iter()
            .any(|seen| seen.worker_id == hand_off.worker_id)
        {
            return Err(RedoError::Invalid("redo worker handed over its invalid pages twice"));
        }
        debug!(
            worker = hand_off.worker_id,
            entries = hand_off.table.entries.len(),
            "redo.invalid_pages.collect"
        );
        self.received.push(hand_off);
        Ok(())
    }

    /// Workers that have not handed over yet.
    pub fn pending(&self) -> usize {
        self.expected_workers.saturating_sub(self.received.len())
    }

    /// Merges every table and makes the fatal/override decision once.
    ///
    /// Fails with [`RedoError::WorkersStillRunning`] if a worker has not
    /// handed over. A key reported by several workers keeps the
    /// classification of the lowest worker id.
    pub fn finish(mut self, ignore: bool) -> Result<usize> {
        let pending = self.pending();
        if pending > 0 {
            return Err(RedoError::WorkersStillRunning { pending });
        }
        self.received.sort_by_key(|hand_off| hand_off.worker_id);
        let mut merged: FxHashMap<PageKey, bool> = FxHashMap::default();
        let mut reported = 0;
        for hand_off in &self.received {
            reported += hand_off.table.reported;
            for entry in &hand_off.table.entries {
                merged.entry(entry.key).or_insert(entry.present);
            }
        }
        let mut entries: Vec<InvalidPageEntry> = merged
            .into_iter()
            .map(|(key, present)| InvalidPageEntry { key, present })
            .collect();
        entries.sort_by_key(|entry| entry.key);
        decide(&entries, reported, ignore)
    }
}
