//! On-disk layout of a container.
//!
//! Block 0 holds the block allocation table, block 1 holds the
//! directory, every block after that stores file data. All integers
//! are little endian.
use crate::fs::{FSError, Result};
use packed_struct::prelude::*;

/// Block holding the allocation table
pub const TABLE_BLOCK: u32 = 0;
/// Block holding the directory
pub const DIRECTORY_BLOCK: u32 = 1;
/// First block available for file data
pub const FIRST_DATA_BLOCK: u32 = 2;

/// Table value of the final block in a file's chain
pub const LAST_BLOCK_OF_FILE: i32 = -1;
/// Written once, one slot past the last table entry
pub const END_OF_BLOCKS_TABLE: i32 = -2;
/// Fixed value of the first directory header word
pub const LAST_DIRECTORY_BLOCK: i32 = -3;

/// Width of a single allocation table slot
pub const SLOT_SIZE: usize = 4;
pub const MAX_FILENAME_LENGTH: usize = 15;

// the packed_struct derive needs a literal length on `FileRecord::name`
const _: () = assert!(MAX_FILENAME_LENGTH == 15);

/// Sizes describing how a container is cut into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    block_size: usize,
    container_size: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            container_size: Self::DEFAULT_CONTAINER_SIZE,
        }
    }
}

impl Geometry {
    pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;
    pub const DEFAULT_CONTAINER_SIZE: usize = 128 * 1024;

    pub fn new(block_size: usize, container_size: usize) -> Result<Self> {
        if block_size == 0 || block_size % SLOT_SIZE != 0 {
            return Err(FSError::InvalidGeometry(
                "block size must be a non-zero multiple of 4",
            ));
        }
        if block_size > i32::MAX as usize {
            return Err(FSError::InvalidGeometry("block size does not fit a table slot"));
        }
        if container_size % block_size != 0 {
            return Err(FSError::InvalidGeometry(
                "container size must be a multiple of the block size",
            ));
        }
        let geometry = Self {
            block_size,
            container_size,
        };
        if geometry.block_count() <= FIRST_DATA_BLOCK as usize {
            return Err(FSError::InvalidGeometry(
                "container needs at least one data block",
            ));
        }
        if geometry.table_size() > block_size {
            return Err(FSError::InvalidGeometry(
                "allocation table does not fit into a single block",
            ));
        }
        if geometry.directory_capacity() == 0 {
            return Err(FSError::InvalidGeometry(
                "directory block cannot hold a single file record",
            ));
        }
        Ok(geometry)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn container_size(&self) -> usize {
        self.container_size
    }

    pub fn block_count(&self) -> usize {
        self.container_size / self.block_size
    }

    pub fn data_block_count(&self) -> usize {
        self.block_count() - FIRST_DATA_BLOCK as usize
    }

    /// Bytes taken by the table slots plus the trailing sentinel
    pub fn table_size(&self) -> usize {
        (self.block_count() + 1) * SLOT_SIZE
    }

    /// Number of file records fitting behind the directory header
    pub fn directory_capacity(&self) -> usize {
        self.block_size.saturating_sub(DirectoryHeader::SIZE) / FileRecord::SIZE
    }

    /// Offset of a record inside the directory block
    pub fn record_offset(&self, index: usize) -> usize {
        DirectoryHeader::SIZE + index * FileRecord::SIZE
    }

    pub fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size as u64
    }

    /// Largest file the data region could hold
    pub fn max_file_size(&self) -> u64 {
        (self.data_block_count() * self.block_size) as u64
    }

    /// Blocks needed to store `size` bytes. Empty files still occupy
    /// one block, its chain needs a terminal slot.
    pub fn blocks_for(&self, size: u64) -> usize {
        let block_size = self.block_size as u64;
        (size.div_ceil(block_size) as usize).max(1)
    }
}

#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(endian = "lsb")]
pub struct DirectoryHeader {
    /// Always `LAST_DIRECTORY_BLOCK`, the directory
    /// never grows past block 1.
    pub terminator: i32,
    /// Count of active records
    pub file_count: i32,
}

impl DirectoryHeader {
    pub const SIZE: usize = 8;

    pub fn empty() -> Self {
        Self {
            terminator: LAST_DIRECTORY_BLOCK,
            file_count: 0,
        }
    }
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotState {
    Free = 0,
    Active = 1,
}

#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(endian = "lsb")]
pub struct FileRecord {
    /// Zero padded, not terminated when all 15 bytes are used
    pub name: [u8; 15],
    #[packed_field(element_size_bytes = "1", ty = "enum")]
    pub state: SlotState,
    /// Bytes used in the final block of the chain
    pub last_block_size: i32,
    /// Head of the chain in the allocation table
    pub first_data_block: i32,
}

impl FileRecord {
    pub const SIZE: usize = 24;

    pub fn free() -> Self {
        Self {
            name: [0; MAX_FILENAME_LENGTH],
            state: SlotState::Free,
            last_block_size: 0,
            first_data_block: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SlotState::Active
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILENAME_LENGTH);
        &self.name[..len]
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}
