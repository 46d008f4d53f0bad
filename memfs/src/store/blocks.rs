//! Per-file sparse block map.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::block::Block;
use super::{BlockLayout, BlockSpan};
use crate::error::{FsError, Result};

/// Sparse collection of blocks keyed by block index, plus the logical size
/// of the file that owns it.
///
/// The map lock is only held long enough to look up or insert blocks; the
/// data copy happens under the individual block's lock, so writers to
/// different blocks of one file never wait on each other.
pub struct BlockStore {
    layout: BlockLayout,
    map: RwLock<BlockMap>,
    size: AtomicU64,
}

#[derive(Default)]
struct BlockMap {
    blocks: HashMap<u64, Arc<Block>>,
    /// Set by `close`; no block is inserted and no size raised afterwards.
    closed: bool,
}

impl BlockStore {
    pub fn new(layout: BlockLayout) -> Self {
        Self {
            layout,
            map: RwLock::new(BlockMap::default()),
            size: AtomicU64::new(0),
        }
    }

    /// Largest `offset + len` of any write seen so far.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn block_count(&self) -> usize {
        self.map.read().blocks.len()
    }

    fn block(&self, index: u64) -> Option<Arc<Block>> {
        self.map.read().blocks.get(&index).cloned()
    }

    /// Blocks backing `spans`, in order. Missing blocks are allocated before
    /// any of them is inserted, so a failed allocation leaves the map as it
    /// was.
    fn blocks_for(&self, spans: &[BlockSpan]) -> Result<Vec<Arc<Block>>> {
        let mut found: Vec<Option<Arc<Block>>> = {
            let map = self.map.read();
            if map.closed {
                return Err(FsError::NotFound);
            }
            spans
                .iter()
                .map(|sp| map.blocks.get(&sp.block_index).cloned())
                .collect()
        };

        let mut fresh = Vec::new();
        for (i, slot) in found.iter().enumerate() {
            if slot.is_none() {
                fresh.push((i, Block::zeroed(self.layout.block_size as usize)?));
            }
        }
        if !fresh.is_empty() {
            let mut map = self.map.write();
            if map.closed {
                return Err(FsError::NotFound);
            }
            // a racing writer may have inserted the same index meanwhile
            for (i, block) in fresh {
                let b = map
                    .blocks
                    .entry(spans[i].block_index)
                    .or_insert_with(|| Arc::new(block));
                found[i] = Some(Arc::clone(b));
            }
        }
        Ok(found.into_iter().flatten().collect())
    }

    /// Read `len` bytes at `offset`. Ranges with no block behind them read as
    /// zeros; the result always has exactly `len` bytes.
    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut cursor = 0usize;
        for sp in self.layout.split_range(offset, len) {
            if let Some(block) = self.block(sp.block_index) {
                block.read_at(sp.offset_in_block, &mut out[cursor..cursor + sp.len]);
            }
            cursor += sp.len;
        }
        out
    }

    /// Write `data` at `offset`, allocating missing blocks first.
    ///
    /// When a block cannot be allocated nothing is inserted, no byte is
    /// copied and the size is left alone. The size is raised only after the
    /// copy completes. Fails with `NotFound` once the store is closed.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        let spans = self.layout.split_range(offset, data.len());
        let targets = self.blocks_for(&spans)?;

        let mut cursor = 0usize;
        for (sp, block) in spans.iter().zip(targets) {
            block.write_at(sp.offset_in_block, &data[cursor..cursor + sp.len]);
            cursor += sp.len;
        }

        let map = self.map.read();
        if map.closed {
            return Err(FsError::NotFound);
        }
        self.size.fetch_max(end, Ordering::AcqRel);
        Ok(data.len())
    }

    /// Drop every block, reset the size to zero and refuse further writes.
    pub fn close(&self) {
        let mut map = self.map.write();
        map.closed = true;
        map.blocks.clear();
        self.size.store(0, Ordering::Release);
    }
}
