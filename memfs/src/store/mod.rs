//! File data storage
//!
//! Responsibilities:
//! - Map file byte ranges onto fixed-size blocks (`BlockLayout`).
//! - Hold each block behind its own reader/writer lock (`block`).
//! - Keep a per-file sparse map of blocks plus the logical file size
//!   (`blocks`).
//!
//! Blocks are created lazily by writes only; reads of unseen blocks are
//! served as zeros.
pub mod block;
pub mod blocks;

pub use block::Block;
pub use blocks::BlockStore;

use crate::config::DEFAULT_BLOCK_SIZE;

/// Block geometry shared by every file of one filesystem instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u64,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// The part of a file range that falls inside one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub block_index: u64,
    pub offset_in_block: usize,
    pub len: usize,
}

impl BlockLayout {
    pub fn new(block_size: u64) -> Self {
        Self { block_size }
    }

    pub fn block_index_of(&self, offset: u64) -> u64 {
        offset / self.block_size
    }

    pub fn within_block_offset(&self, offset: u64) -> u64 {
        offset % self.block_size
    }

    /// Split `[offset, offset+len)` into per-block spans, in ascending order.
    pub fn split_range(&self, mut offset: u64, len: usize) -> Vec<BlockSpan> {
        let mut remaining = len as u64;
        let mut out = Vec::new();
        while remaining > 0 {
            let off_in_block = self.within_block_offset(offset);
            let take = (self.block_size - off_in_block).min(remaining);
            out.push(BlockSpan {
                block_index: self.block_index_of(offset),
                offset_in_block: off_in_block as usize,
                len: take as usize,
            });
            offset = offset.saturating_add(take);
            remaining -= take;
        }
        out
    }
}
