#![forbid(unsafe_code)]
//! Heap truncation replay and the free-space-map / visibility-map geometry
//! it needs to size the auxiliary forks.

use tracing::debug;

use crate::buffer::BlockSource;
use crate::primitives::page::PAGE_HDR_LEN;
use crate::redo::RedoSession;
use crate::types::{BlockNumber, ForkNumber, RelFileNode, Result, INVALID_BACKEND_ID};

const FSM_TREE_DEPTH: u64 = 3;
const FSM_PAGE_HEADER: usize = 4;
const VM_HEAPBLOCKS_PER_BYTE: u64 = 8;

fn fsm_slots_per_page(page_size: usize) -> u64 {
    let nodes = page_size - PAGE_HDR_LEN - FSM_PAGE_HEADER;
    let non_leaf = page_size / 2 - 1;
    (nodes - non_leaf) as u64
}

fn fsm_logical_to_physical(slots: u64, level: u64, logical: u64) -> u64 {
    let mut leaf = logical;
    for _ in 0..level {
        leaf *= slots;
    }
    let mut pages = 0;
    for _ in 0..FSM_TREE_DEPTH {
        pages += leaf + 1;
        leaf /= slots;
    }
    pages - level - 1
}

/// FSM blocks kept when the heap shrinks to `heap_blocks`.
///
/// The leaf page holding the first removed heap block survives unless that
/// block sits in its first slot; upper-level pages in front of it survive too.
pub fn fsm_blocks_for_heap(heap_blocks: BlockNumber, page_size: usize) -> BlockNumber {
    let slots = fsm_slots_per_page(page_size);
    let heap = heap_blocks as u64;
    let first_leaf = fsm_logical_to_physical(slots, 0, heap / slots);
    let keep = if heap % slots > 0 { first_leaf + 1 } else { first_leaf };
    keep.min(BlockNumber::MAX as u64) as BlockNumber
}

/// VM blocks kept when the heap shrinks to `heap_blocks`.
pub fn vm_blocks_for_heap(heap_blocks: BlockNumber, page_size: usize) -> BlockNumber {
    let per_page = (page_size - PAGE_HDR_LEN) as u64 * VM_HEAPBLOCKS_PER_BYTE;
    let heap = heap_blocks as u64;
    let keep = heap / per_page + u64::from(heap % per_page > 0);
    keep as BlockNumber
}

/// What a heap truncation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapTruncation {
    /// Main fork length after truncation.
    pub main_blocks: BlockNumber,
    /// FSM fork length kept.
    pub fsm_blocks: BlockNumber,
    /// VM fork length kept.
    pub vm_blocks: BlockNumber,
    /// Invalid page entries forgotten across the three forks.
    pub forgotten: usize,
    /// Buffered pages discarded across the three forks.
    pub discarded: usize,
}

impl RedoSession {
    /// Replays a heap truncation to `nblocks` across the main, FSM and VM
    /// forks: forgets invalid pages past the new ends, discards their
    /// buffers in the shared pool and the local cache, and shortens the fork
    /// files.
    ///
    /// Buffers go before the files so no dirty page past the new end can be
    /// written back and regrow a fork.
    pub fn truncate_heap(&mut self, node: RelFileNode, nblocks: BlockNumber) -> Result<HeapTruncation> {
        let page_size = self.env.options().page_size;
        let mut outcome = HeapTruncation {
            main_blocks: nblocks,
            fsm_blocks: fsm_blocks_for_heap(nblocks, page_size),
            vm_blocks: vm_blocks_for_heap(nblocks, page_size),
            ..HeapTruncation::default()
        };
        let rel = self.env.smgr().open(node, INVALID_BACKEND_ID);
        for (fork, keep) in [
            (ForkNumber::Main, outcome.main_blocks),
            (ForkNumber::FreeSpaceMap, outcome.fsm_blocks),
            (ForkNumber::VisibilityMap, outcome.vm_blocks),
        ] {
            outcome.forgotten += self.tracker.forget_range(node, fork, keep);
            outcome.discarded += self.env.pool().drop_relation_buffers(node, fork, keep)?;
            outcome.discarded += self.local.drop_relation_buffers(node, fork, keep)?;
            if rel.exists(fork) && rel.nblocks(fork)? > keep {
                rel.truncate(fork, keep)?;
            }
        }
        debug!(
            rel = %node,
            main = outcome.main_blocks,
            fsm = outcome.fsm_blocks,
            vm = outcome.vm_blocks,
            forgotten = outcome.forgotten,
            discarded = outcome.discarded,
            "redo.truncate_heap"
        );
        Ok(outcome)
    }
}
