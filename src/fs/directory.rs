//! The single directory block: a header followed by a fixed
//! number of file records.

use super::{FSError, FileName, Result};
use crate::container::layout::{
    DirectoryHeader, FileRecord, Geometry, SlotState, LAST_DIRECTORY_BLOCK,
};
use packed_struct::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    header: DirectoryHeader,
    records: Vec<FileRecord>,
}

impl Directory {
    pub fn empty(geometry: &Geometry) -> Self {
        Self {
            header: DirectoryHeader::empty(),
            records: vec![FileRecord::free(); geometry.directory_capacity()],
        }
    }

    /// Decodes the directory from the contents of block 1
    pub fn decode(geometry: &Geometry, block: &[u8]) -> Result<Self> {
        let header = DirectoryHeader::unpack_from_slice(&block[..DirectoryHeader::SIZE])?;
        if header.terminator != LAST_DIRECTORY_BLOCK {
            return Err(FSError::Corrupted("directory header is damaged"));
        }
        let records = (0..geometry.directory_capacity())
            .map(|index| {
                let offset = geometry.record_offset(index);
                FileRecord::unpack_from_slice(&block[offset..offset + FileRecord::SIZE])
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let directory = Self { header, records };
        if directory.header.file_count < 0
            || directory.header.file_count as usize != directory.active_count()
        {
            return Err(FSError::Corrupted(
                "directory file count does not match its active records",
            ));
        }
        Ok(directory)
    }

    /// Writes header and records over the start of block 1
    pub fn encode(&self, geometry: &Geometry, block: &mut [u8]) -> Result<()> {
        self.header
            .pack_to_slice(&mut block[..DirectoryHeader::SIZE])?;
        for (index, record) in self.records.iter().enumerate() {
            let offset = geometry.record_offset(index);
            record.pack_to_slice(&mut block[offset..offset + FileRecord::SIZE])?;
        }
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.header.file_count as usize
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_active()).count()
    }

    /// Slot of the active record called `name`
    pub fn find_by_name(&self, name: &FileName) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.is_active() && r.name_bytes() == name.as_bytes())
    }

    /// First slot not holding an active record
    pub fn find_free_slot(&self) -> Result<usize> {
        self.records
            .iter()
            .position(|r| !r.is_active())
            .ok_or(FSError::DirectoryFull(self.capacity()))
    }

    pub fn record(&self, index: usize) -> Option<&FileRecord> {
        self.records.get(index)
    }

    /// Stores an active record in a free slot and counts it
    pub fn insert(&mut self, index: usize, record: FileRecord) {
        debug_assert!(record.is_active() && !self.records[index].is_active());
        self.records[index] = record;
        self.header.file_count += 1;
    }

    /// Marks the record at `index` inactive and returns it. The stale
    /// record bytes stay until the slot is reused.
    pub fn deactivate(&mut self, index: usize) -> Option<FileRecord> {
        let record = self.records.get_mut(index).filter(|r| r.is_active())?;
        let removed = record.clone();
        record.state = SlotState::Free;
        self.header.file_count -= 1;
        Some(removed)
    }

    /// Active records with their slot index
    pub fn active(&self) -> impl Iterator<Item = (usize, &FileRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_active())
    }
}
