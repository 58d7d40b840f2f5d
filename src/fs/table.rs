//! The block allocation table.
//!
//! One slot per block, stored at the start of block 0 and followed by
//! an `END_OF_BLOCKS_TABLE` sentinel. A slot is either free, points to
//! the next block of a chain, or ends a chain. Allocation is first fit
//! in index order, there is no free list.

use super::{FSError, Result};
use crate::container::layout::{
    Geometry, END_OF_BLOCKS_TABLE, FIRST_DATA_BLOCK, LAST_BLOCK_OF_FILE, SLOT_SIZE,
};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    /// Allocated, chained to the given block
    Next(u32),
    /// Allocated, final block of its chain
    Last,
}

impl BlockState {
    fn decode(value: i32, block_count: usize) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            LAST_BLOCK_OF_FILE => Ok(Self::Last),
            next if next >= FIRST_DATA_BLOCK as i32 && (next as usize) < block_count => {
                Ok(Self::Next(next as u32))
            }
            _ => Err(FSError::Corrupted("invalid value in the block allocation table")),
        }
    }

    fn encode(self) -> i32 {
        match self {
            Self::Free => 0,
            Self::Next(next) => next as i32,
            Self::Last => LAST_BLOCK_OF_FILE,
        }
    }

    pub fn is_free(self) -> bool {
        self == Self::Free
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockTable {
    slots: Vec<BlockState>,
}

impl BlockTable {
    /// Table of a freshly created container
    pub fn empty(geometry: &Geometry) -> Self {
        Self {
            slots: vec![BlockState::Free; geometry.block_count()],
        }
    }

    /// Decodes the table from the contents of block 0
    pub fn decode(geometry: &Geometry, block: &[u8]) -> Result<Self> {
        let block_count = geometry.block_count();
        let mut values = block[..geometry.table_size()]
            .chunks_exact(SLOT_SIZE)
            .map(|slot| i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]));
        let slots = values
            .by_ref()
            .take(block_count)
            .map(|value| BlockState::decode(value, block_count))
            .collect::<Result<Vec<_>>>()?;
        if values.next() != Some(END_OF_BLOCKS_TABLE) {
            return Err(FSError::Corrupted("block allocation table sentinel is missing"));
        }
        Ok(Self { slots })
    }

    /// Writes the slots and the sentinel over the start of block 0
    pub fn encode(&self, block: &mut [u8]) {
        let sentinel = std::iter::once(END_OF_BLOCKS_TABLE);
        let values = self.slots.iter().map(|state| state.encode()).chain(sentinel);
        for (slot, value) in block.chunks_exact_mut(SLOT_SIZE).zip(values) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, block: u32) -> Option<BlockState> {
        self.slots.get(block as usize).copied()
    }

    fn data_slots(&self) -> impl Iterator<Item = (u32, BlockState)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(FIRST_DATA_BLOCK as usize)
            .map(|(index, &state)| (index as u32, state))
    }

    pub fn free_count(&self) -> usize {
        self.data_slots().filter(|(_, state)| state.is_free()).count()
    }

    /// Claims `count` free blocks in index order and links them into
    /// a chain. Returns the chain, head first. Nothing changes when
    /// there are not enough free blocks.
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        let claimed: Vec<u32> = self
            .data_slots()
            .filter(|(_, state)| state.is_free())
            .map(|(index, _)| index)
            .take(count)
            .collect();
        if claimed.len() < count || claimed.is_empty() {
            return Err(FSError::CapacityExceeded {
                requested: count,
                free: claimed.len(),
            });
        }
        for pair in claimed.windows(2) {
            self.slots[pair[0] as usize] = BlockState::Next(pair[1]);
        }
        if let Some(&last) = claimed.last() {
            self.slots[last as usize] = BlockState::Last;
        }
        trace!("Allocated chain {:?}", claimed);
        Ok(claimed)
    }

    /// Follows the chain starting at `first`, head first.
    pub fn chain(&self, first: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut block = first;
        loop {
            if block < FIRST_DATA_BLOCK || chain.len() >= self.slots.len() {
                return Err(FSError::Corrupted("file chain leaves the data region or loops"));
            }
            chain.push(block);
            match self.slots.get(block as usize) {
                Some(BlockState::Next(next)) => block = *next,
                Some(BlockState::Last) => return Ok(chain),
                _ => return Err(FSError::Corrupted("file chain runs into a free block")),
            }
        }
    }

    /// Frees every block of the chain starting at `first` and returns
    /// how many were released. A broken chain is reported before
    /// anything is freed.
    pub fn reclaim(&mut self, first: u32) -> Result<usize> {
        let chain = self.chain(first)?;
        for &block in &chain {
            self.slots[block as usize] = BlockState::Free;
        }
        trace!("Reclaimed chain {:?}", chain);
        Ok(chain.len())
    }

    /// Byte length of a file from its chain and final block fill.
    pub fn logical_size(
        &self,
        geometry: &Geometry,
        first: u32,
        last_block_size: i32,
    ) -> Result<u64> {
        let blocks = self.chain(first)?.len() as u64;
        if last_block_size < 0 || last_block_size as usize > geometry.block_size() {
            return Err(FSError::Corrupted("last block size is out of range"));
        }
        Ok((blocks - 1) * geometry.block_size() as u64 + last_block_size as u64)
    }
}
