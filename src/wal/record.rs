//! Decoded-record view consumed by replay.
//!
//! The decoding layer produces these; this crate never parses record bytes.

use bytes::Bytes;

use crate::types::{BlockNumber, ForkNumber, Lsn, PageKey, RelFileNode};

/// Largest block id a record may reference.
pub const MAX_BLOCK_ID: u8 = 32;

/// Full-page image carried by a block reference, with its hole elided.
#[derive(Clone, Debug)]
pub struct BlockImage {
    /// Image bytes: the page minus the hole.
    pub bytes: Bytes,
    /// Start of the elided zero run.
    pub hole_offset: u16,
    /// Length of the elided zero run.
    pub hole_length: u16,
}

/// One block reference of a decoded record.
#[derive(Clone, Debug)]
pub struct DecodedBlock {
    /// Relation the block belongs to.
    pub node: RelFileNode,
    /// Fork of the block.
    pub fork: ForkNumber,
    /// Block number.
    pub block: BlockNumber,
    /// The record rebuilds the block from scratch.
    pub will_init: bool,
    /// Full-page image, if one was logged.
    pub image: Option<BlockImage>,
    /// LSN the page is expected to carry before this record, if recorded.
    pub prev_lsn: Option<Lsn>,
}

impl DecodedBlock {
    /// Plain reference to `block` without image or init flag.
    pub fn new(node: RelFileNode, fork: ForkNumber, block: BlockNumber) -> Self {
        Self {
            node,
            fork,
            block,
            will_init: false,
            image: None,
            prev_lsn: None,
        }
    }

    /// Marks the block as reinitialized by the record.
    pub fn will_init(mut self) -> Self {
        self.will_init = true;
        self
    }

    /// Attaches a full-page image.
    pub fn with_image(mut self, bytes: impl Into<Bytes>, hole_offset: u16, hole_length: u16) -> Self {
        self.image = Some(BlockImage {
            bytes: bytes.into(),
            hole_offset,
            hole_length,
        });
        self
    }

    /// Attaches the prior-LSN hint.
    pub fn with_prev_lsn(mut self, lsn: Lsn) -> Self {
        self.prev_lsn = Some(lsn);
        self
    }

    /// Page identity of the reference.
    pub fn key(&self) -> PageKey {
        PageKey::new(self.node, self.fork, self.block)
    }
}

/// What replay needs from a decoded record.
pub trait RecordView {
    /// LSN just past the end of the record.
    fn end_lsn(&self) -> Lsn;
    /// Block reference `block_id`, if the record has one.
    fn block(&self, block_id: u8) -> Option<&DecodedBlock>;
}

/// Owned decoded record.
#[derive(Clone, Debug, Default)]
pub struct DecodedRecord {
    end_lsn: Lsn,
    blocks: Vec<Option<DecodedBlock>>,
}

impl DecodedRecord {
    /// Record ending at `end_lsn` with no block references.
    pub fn new(end_lsn: Lsn) -> Self {
        Self {
            end_lsn,
            blocks: Vec::new(),
        }
    }

    /// Adds `block` under `block_id`. Ids above [`MAX_BLOCK_ID`] are ignored.
    pub fn with_block(mut self, block_id: u8, block: DecodedBlock) -> Self {
        if block_id > MAX_BLOCK_ID {
            return self;
        }
        let idx = block_id as usize;
        if self.blocks.len() <= idx {
            self.blocks.resize(idx + 1, None);
        }
        self.blocks[idx] = Some(block);
        self
    }

    /// Highest block id in use, if any.
    pub fn max_block_id(&self) -> Option<u8> {
        self.blocks
            .iter()
            .rposition(Option::is_some)
            .map(|idx| idx as u8)
    }
}

impl RecordView for DecodedRecord {
    fn end_lsn(&self) -> Lsn {
        self.end_lsn
    }

    fn block(&self, block_id: u8) -> Option<&DecodedBlock> {
        self.blocks.get(block_id as usize)?.as_ref()
    }
}
